//! IEEE-754 binary16 conversion.
//!
//! Round-to-nearest-even on narrowing, exact on widening. Overflow saturates
//! to infinity; subnormals are preserved in both directions.

/// Narrow an `f32` to binary16 bits.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let x = value.to_bits();
    let sign = ((x >> 16) & 0x8000) as u16;
    let exp = ((x >> 23) & 0xff) as i32;
    let mant = x & 0x007f_ffff;

    if exp == 0xff {
        let nan = if mant == 0 { 0 } else { 0x0200 | (mant >> 13) as u16 };
        return sign | 0x7c00 | nan;
    }

    let unbiased = exp - 127;
    if unbiased > 15 {
        return sign | 0x7c00;
    }

    if unbiased >= -14 {
        let mut h = (((unbiased + 15) as u32) << 10) | (mant >> 13);
        let rest = mant & 0x1fff;
        if rest > 0x1000 || (rest == 0x1000 && h & 1 == 1) {
            // A carry out of the mantissa bumps the exponent, which is correct.
            h += 1;
        }
        return sign | h as u16;
    }

    if unbiased < -25 {
        return sign;
    }

    // Subnormal half: shift the full significand into the 10-bit field.
    let full = mant | 0x0080_0000;
    let shift = (-14 - unbiased) as u32 + 13;
    let mut h = full >> shift;
    let rest = full & ((1_u32 << shift) - 1);
    let halfway = 1_u32 << (shift - 1);
    if rest > halfway || (rest == halfway && h & 1 == 1) {
        h += 1;
    }
    sign | h as u16
}

/// Widen binary16 bits to an `f32`.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn f16_bits_to_f32(h: u16) -> f32 {
    let sign = u32::from(h & 0x8000) << 16;
    let exp = u32::from((h >> 10) & 0x1f);
    let mant = u32::from(h & 0x03ff);

    let bits = match (exp, mant) {
        (0, 0) => sign,
        (0, m) => {
            let mut e: i32 = -14;
            let mut m = m;
            while m & 0x0400 == 0 {
                m <<= 1;
                e -= 1;
            }
            sign | (((e + 127) as u32) << 23) | ((m & 0x03ff) << 13)
        }
        (0x1f, 0) => sign | 0x7f80_0000,
        (0x1f, m) => sign | 0x7fc0_0000 | (m << 13),
        (e, m) => sign | ((e + 112) << 23) | (m << 13),
    };
    f32::from_bits(bits)
}
