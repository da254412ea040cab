//! Device fingerprinting and hardware-info derivation for license activation.
//!
//! The backend never sees the raw fingerprint. It receives a triple of
//! pseudo serial numbers composed from the fingerprint, and hashes those into
//! the hardware identifier used for activation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Raw device facts gathered once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Opaque, stable visitor identifier (32 lowercase hex characters).
    pub visitor_id: String,
    pub cpu_cores: Option<usize>,
    pub platform: String,
    pub user_agent: String,
}

/// Produces a [`Fingerprint`] for the current device.
pub trait FingerprintSource: Send + Sync {
    fn fingerprint(&self) -> Fingerprint;
}

/// Fingerprint derived from facts about the host running the client.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFingerprint;

impl FingerprintSource for HostFingerprint {
    fn fingerprint(&self) -> Fingerprint {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let cores = num_cpus::get();
        let home = dirs::home_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let seed = format!("{}|{}|{}|{}", os, arch, cores, home);
        let visitor_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
            .simple()
            .to_string();

        Fingerprint {
            visitor_id,
            cpu_cores: Some(cores),
            platform: format!("{}/{}", os, arch),
            user_agent: format!("pconvert/{} ({}; {})", env!("CARGO_PKG_VERSION"), os, arch),
        }
    }
}

/// The triple submitted to the hardware-id endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub cpu_id: String,
    pub bios_serial: String,
    pub motherboard_serial: String,
}

impl HardwareInfo {
    pub fn new(
        cpu_id: impl Into<String>,
        bios_serial: impl Into<String>,
        motherboard_serial: impl Into<String>,
    ) -> Self {
        Self {
            cpu_id: cpu_id.into(),
            bios_serial: bios_serial.into(),
            motherboard_serial: motherboard_serial.into(),
        }
    }

    /// Composes the triple from a fingerprint.
    ///
    /// - `cpu_id`: visitor id followed by the core count
    /// - `bios_serial`: platform followed by the first 8 characters of the visitor id
    /// - `motherboard_serial`: first 20 characters of the user agent followed by
    ///   characters 8..16 of the visitor id
    pub fn derive(fp: &Fingerprint) -> Self {
        let cores = fp.cpu_cores.map(|c| c.to_string()).unwrap_or_default();

        Self {
            cpu_id: format!("{}{}", fp.visitor_id, cores),
            bios_serial: format!("{}{}", fp.platform, char_slice(&fp.visitor_id, 0, 8)),
            motherboard_serial: format!(
                "{}{}",
                char_slice(&fp.user_agent, 0, 20),
                char_slice(&fp.visitor_id, 8, 16)
            ),
        }
    }

    /// Rejects the triple unless every field has non-blank content.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing: Vec<&'static str> = [
            ("cpu_id", &self.cpu_id),
            ("bios_serial", &self.bios_serial),
            ("motherboard_serial", &self.motherboard_serial),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingFields(missing))
        }
    }

    pub fn trimmed(&self) -> Self {
        Self::new(
            self.cpu_id.trim(),
            self.bios_serial.trim(),
            self.motherboard_serial.trim(),
        )
    }
}

/// Characters `start..end` of `s`, clamped to its length.
fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Fingerprint {
        Fingerprint {
            visitor_id: "0123456789abcdef0123456789abcdef".to_string(),
            cpu_cores: Some(8),
            platform: "linux/x86_64".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko".to_string(),
        }
    }

    #[test]
    fn test_derive_composition() {
        let info = HardwareInfo::derive(&sample());
        assert_eq!(info.cpu_id, "0123456789abcdef0123456789abcdef8");
        assert_eq!(info.bios_serial, "linux/x86_6401234567");
        assert_eq!(info.motherboard_serial, "Mozilla/5.0 (X11; Li89abcdef");
    }

    #[test]
    fn test_derive_is_deterministic() {
        assert_eq!(HardwareInfo::derive(&sample()), HardwareInfo::derive(&sample()));
    }

    #[test]
    fn test_derive_short_inputs() {
        let fp = Fingerprint {
            visitor_id: "abc".to_string(),
            cpu_cores: None,
            platform: String::new(),
            user_agent: "ua".to_string(),
        };
        let info = HardwareInfo::derive(&fp);
        assert_eq!(info.cpu_id, "abc");
        assert_eq!(info.bios_serial, "abc");
        assert_eq!(info.motherboard_serial, "ua");
    }

    #[test]
    fn test_derive_multibyte_user_agent() {
        let mut fp = sample();
        fp.user_agent = "ñññññññññññññññññññññññ".to_string();
        let info = HardwareInfo::derive(&fp);
        assert!(info.motherboard_serial.starts_with("ññññññññññññññññññññ8"));
    }

    #[test]
    fn test_validate_reports_all_missing() {
        let info = HardwareInfo::new("cpu", " ", "");
        assert_eq!(
            info.validate(),
            Err(ValidationError::MissingFields(vec![
                "bios_serial",
                "motherboard_serial"
            ]))
        );
        assert!(HardwareInfo::new("a", "b", "c").validate().is_ok());
    }

    #[test]
    fn test_host_fingerprint_stable() {
        let a = HostFingerprint.fingerprint();
        let b = HostFingerprint.fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.visitor_id.len(), 32);
        assert!(HardwareInfo::derive(&a).validate().is_ok());
    }
}
