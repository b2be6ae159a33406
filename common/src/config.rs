use serde::{Deserialize, Serialize};

/// Stored network credentials. Empty strings mean "not configured"; the
/// store itself guarantees nothing beyond last-write-wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    pub fn is_provisioned(&self) -> bool {
        !self.ssid.is_empty()
    }
}

/// Run mode, selected exactly once at boot from the credential store.
/// Provisioning never returns; operating loops until a fatal restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootMode {
    Provisioning,
    Operating(Credentials),
}

impl BootMode {
    pub fn decide(credentials: Credentials) -> Self {
        if credentials.is_provisioned() {
            Self::Operating(credentials)
        } else {
            Self::Provisioning
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ssid_selects_provisioning() {
        assert_eq!(
            BootMode::decide(Credentials::default()),
            BootMode::Provisioning
        );
        assert_eq!(
            BootMode::decide(Credentials::new("", "secret")),
            BootMode::Provisioning
        );
    }

    #[test]
    fn stored_ssid_selects_operating() {
        let credentials = Credentials::new("Home", "secret");
        assert_eq!(
            BootMode::decide(credentials.clone()),
            BootMode::Operating(credentials)
        );
    }

    #[test]
    fn empty_password_is_still_provisioned() {
        assert!(Credentials::new("OpenNetwork", "").is_provisioned());
    }
}
