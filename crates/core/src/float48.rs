//! The legacy 48-bit float carried directly in a tag node.
//!
//! Layout: the tag's low byte is a biased exponent `e` (0 means exactly 0.0),
//! its high byte is the lowest 8 bits of a 39-bit mantissa, and the payload word
//! holds the sign in bit 31 and the high 31 mantissa bits. This is the Turbo
//! Pascal `Real` layout. The value is `sign * 2^(e - 129) * 1.mantissa`.
//!
//! Decoding goes through `f64` so all 39 mantissa bits survive.

const MANTISSA_BITS: i32 = 39;
const EXPONENT_BIAS: i32 = 129;
const SIGN_BIT: u32 = 0x8000_0000;
const HIGH_MANTISSA_MASK: u32 = 0x7FFF_FFFF;
const LOW_MANTISSA_BITS: u32 = 8;
const F64_FRACTION_BITS: u32 = 52;
const DROPPED_BITS: u32 = F64_FRACTION_BITS - MANTISSA_BITS as u32;

/// Decodes a 48-bit float from its tag code and payload word.
pub fn decode(code: u16, payload: u32) -> f64 {
    let exponent = i32::from(code & 0x00FF);
    if exponent == 0 {
        return 0.0;
    }
    let mantissa =
        (u64::from(payload & HIGH_MANTISSA_MASK) << LOW_MANTISSA_BITS) | u64::from(code >> 8);
    let significand = (mantissa | (1u64 << MANTISSA_BITS)) as f64;
    let magnitude = ldexp(significand, exponent - EXPONENT_BIAS - MANTISSA_BITS);
    if payload & SIGN_BIT != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encodes `value` as `(code, payload)`, rounding the mantissa half-to-even.
///
/// Returns `None` for zero, non-finite values and magnitudes outside the
/// exponent range; callers pick another tag for those.
pub fn encode(value: f64) -> Option<(u16, u32)> {
    if value == 0.0 || !value.is_finite() {
        return None;
    }
    let bits = value.to_bits();
    let negative = bits >> 63 != 0;
    let biased = ((bits >> F64_FRACTION_BITS) & 0x7FF) as i32;
    if biased == 0 {
        // f64 subnormals are far below the smallest 48-bit float.
        return None;
    }
    let fraction = bits & ((1u64 << F64_FRACTION_BITS) - 1);

    let mut exponent = biased - 1023 + EXPONENT_BIAS;
    let mut mantissa = fraction >> DROPPED_BITS;
    let rest = fraction & ((1u64 << DROPPED_BITS) - 1);
    let half = 1u64 << (DROPPED_BITS - 1);
    if rest > half || (rest == half && mantissa & 1 == 1) {
        mantissa += 1;
        if mantissa == 1u64 << MANTISSA_BITS {
            mantissa = 0;
            exponent += 1;
        }
    }
    if !(1..=255).contains(&exponent) {
        return None;
    }

    let code = (((mantissa & 0xFF) as u16) << 8) | exponent as u16;
    let mut payload = ((mantissa >> LOW_MANTISSA_BITS) as u32) & HIGH_MANTISSA_MASK;
    if negative {
        payload |= SIGN_BIT;
    }
    Some((code, payload))
}

/// `value * 2^exp` for exponents that keep the scale factor a normal `f64`.
fn ldexp(value: f64, exp: i32) -> f64 {
    debug_assert!((-1022..=1023).contains(&exp));
    value * f64::from_bits(((exp + 1023) as u64) << F64_FRACTION_BITS)
}
