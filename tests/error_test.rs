//! Tests for error types

use trueno_cache::Error;

#[test]
fn test_unsupported_compression_error() {
    let error = Error::UnsupportedCompression("brotli".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Unsupported compression"));
    assert!(error_str.contains("brotli"));
    assert!(error_str.contains("compression` feature"));
}

#[test]
fn test_codec_error() {
    let error = Error::Codec("int8 payload too short".to_string());
    assert_eq!(format!("{error}"), "Codec error: int8 payload too short");
}

#[test]
fn test_storage_error() {
    let error = Error::storage("disk", "file truncated");
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage I/O error on disk"));
    assert!(error_str.contains("file truncated"));
    assert!(error.is_retryable());
}

#[test]
fn test_dependency_timeout_error() {
    let error = Error::DependencyTimeout {
        operation: "kv.get".to_string(),
        timeout_ms: 250,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("kv.get"));
    assert!(error_str.contains("250ms"));
    assert!(error.is_retryable());
}

#[test]
fn test_capacity_exceeded_error() {
    let error = Error::CapacityExceeded {
        tier: "accelerator".to_string(),
        requested: 4096,
        available: 1024,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Capacity exceeded on accelerator"));
    assert!(error_str.contains("4096"));
    assert!(error_str.contains("1024"));
    assert!(!error.is_retryable());
}

#[test]
fn test_gpu_init_failed_error() {
    let error = Error::GpuInitFailed("no adapter".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("GPU initialization failed"));
    assert!(error_str.contains("host-resident"));
}

#[test]
fn test_invalid_input_error() {
    let error = Error::InvalidInput("artifact id must not be empty".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid input"));
    assert!(!error.is_retryable());
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "segment.bin");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("segment.bin"));
}

#[test]
fn test_json_error_conversion() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_err.into();
    assert!(matches!(error, Error::Serialization(ref m) if m.starts_with("json:")));
}

#[test]
fn test_other_and_worker_pool_errors() {
    assert_eq!(format!("{}", Error::Other("boom".into())), "boom");
    let error = Error::WorkerPool("job panicked".into());
    assert!(format!("{error}").contains("Worker pool error"));
}

#[test]
fn test_error_debug_format() {
    let error = Error::Serialization("bincode: unexpected end".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Serialization"));
}
