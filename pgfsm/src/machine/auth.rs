//! Authentication exchange.
use md5::{Digest, Md5};

/// Compute the password message for md5 authentication.
///
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub(crate) fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    let output = md5.finalize_reset();
    md5.update(format!("{:x}", output));
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

/// Server requested an authentication method that is not supported.
pub struct UnsupportedAuth {
    pub(crate) method: &'static str,
}

impl UnsupportedAuth {
    /// Name of the requested method.
    pub fn method(&self) -> &'static str {
        self.method
    }
}

impl std::error::Error for UnsupportedAuth { }

impl std::fmt::Display for UnsupportedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "auth method `{}` is not supported", self.method)
    }
}

impl std::fmt::Debug for UnsupportedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5() {
        let salt = [0x2a, 0x3d, 0x8f, 0xe0];
        assert_eq!(
            md5_password("md5_user", "password", salt),
            "md562af4dd09bbb41884907a838a3233294",
        );
    }

    #[test]
    fn md5_depends_on_salt() {
        let a = md5_password("user", "secret", [0, 0, 0, 1]);
        let b = md5_password("user", "secret", [0, 0, 0, 2]);
        assert_ne!(a, b);
        assert!(a.starts_with("md5"));
        assert_eq!(a.len(), 3 + 32);
    }
}
