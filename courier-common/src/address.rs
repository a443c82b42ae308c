use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("malformed address")]
    Malformed,
}

/// Split `local@domain` into its two parts.
///
/// The bare `postmaster` address (RFC 5321 section 4.5.1) has no domain and
/// is returned with an empty one. Anything else must contain exactly one `@`
/// with non-empty text on both sides.
///
/// # Errors
/// If the address cannot be split
pub fn split_address(addr: &str) -> Result<(&str, &str), AddressError> {
    match addr.split_once('@') {
        None if addr.eq_ignore_ascii_case("postmaster") => Ok((addr, "")),
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok((local, domain))
        }
        _ => Err(AddressError::Malformed),
    }
}

/// Strip control characters (CR, LF, NUL, ...) so the value cannot break out
/// of the header field it is interpolated into.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_control()).collect()
}
