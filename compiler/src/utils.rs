//! Lexeme-to-scalar conversion helpers shared by default parsing and value
//! emission.

/// `strtoll`-style conversion: parse failures from out-of-range text
/// saturate instead of erroring, anything else converts as 0. The lexer
/// guarantees the text is sign-plus-digits.
pub fn string_to_int(s: &str) -> i64 {
    match s.parse::<i64>() {
        Ok(v) => v,
        Err(_) if s.starts_with('-') && s.len() > 1 => i64::MIN,
        Err(_) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => i64::MAX,
        Err(_) => 0,
    }
}

/// `strtod`-style conversion; unparseable text converts as 0.
pub fn string_to_float(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(0.0)
}

/// Require the two's-complement value to fit in a `bits`-wide field: the
/// high bits must be all zero (a positive or unsigned-fitting value) or all
/// one (a negative-fitting value).
pub fn check_bits_fit(val: i64, bits: usize) -> Result<(), String> {
    if bits >= 64 {
        return Ok(());
    }
    let mask = (1i64 << bits) - 1;
    if (val & !mask) != 0 && (val | mask) != -1 {
        return Err(format!("Constant does not fit in a {}-bit field", bits));
    }
    Ok(())
}

/// Range-checked integer conversion for a field `bits` wide.
pub fn int_in_bits(s: &str, bits: usize) -> Result<i64, String> {
    let val = string_to_int(s);
    check_bits_fit(val, bits)?;
    Ok(val)
}
