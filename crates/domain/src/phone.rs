//! Destination normalization for outbound messages.

use crate::error::{Error, Result};

/// JID suffix for individual WhatsApp accounts.
pub const USER_JID_SUFFIX: &str = "@s.whatsapp.net";

/// Shortest digit string accepted as an international number.
pub const MIN_DIGITS: usize = 8;

/// Turn a user-entered phone number into a WhatsApp user JID.
///
/// Every non-digit is dropped (`+51 987-654-321` → `51987654321`), then the
/// user JID suffix is appended.
pub fn to_user_jid(raw: &str) -> Result<String> {
    if raw.ends_with(USER_JID_SUFFIX) {
        let digits = &raw[..raw.len() - USER_JID_SUFFIX.len()];
        if digits.len() >= MIN_DIGITS && digits.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(raw.to_owned());
        }
    }

    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_DIGITS {
        return Err(Error::InvalidPhone(format!(
            "\"{raw}\" must be in international format (at least {MIN_DIGITS} digits)"
        )));
    }
    Ok(format!("{digits}{USER_JID_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formatting() {
        assert_eq!(
            to_user_jid("+51 987-654-321").unwrap(),
            "51987654321@s.whatsapp.net"
        );
    }

    #[test]
    fn plain_digits_pass() {
        assert_eq!(
            to_user_jid("51987654321").unwrap(),
            "51987654321@s.whatsapp.net"
        );
    }

    #[test]
    fn existing_jid_is_kept() {
        assert_eq!(
            to_user_jid("51987654321@s.whatsapp.net").unwrap(),
            "51987654321@s.whatsapp.net"
        );
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(matches!(to_user_jid("12-34"), Err(Error::InvalidPhone(_))));
        assert!(to_user_jid("").is_err());
    }
}
