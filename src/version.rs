// Firmware version information

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Firmware version as carried in the wire protocol, formatted
/// `major.minor.build`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
}

impl FirmwareVersion {
    pub const fn new(major: u16, minor: u16, build: u16) -> Self {
        Self { major, minor, build }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = |name: &str| -> Result<u16, String> {
            parts
                .next()
                .ok_or_else(|| format!("missing {} component in '{}'", name, s))?
                .parse::<u16>()
                .map_err(|e| format!("bad {} component in '{}': {}", name, s, e))
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let build = next("build")?;
        if parts.next().is_some() {
            return Err(format!("too many components in '{}'", s));
        }
        Ok(Self { major, minor, build })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_three_part_version() {
        assert_eq!(FirmwareVersion::new(1, 2, 30).to_string(), "1.2.30");
    }

    #[test]
    fn parses_round_trip() {
        let v: FirmwareVersion = "3.0.12".parse().unwrap();
        assert_eq!(v, FirmwareVersion::new(3, 0, 12));
    }

    #[test]
    fn rejects_short_and_long_forms() {
        assert!("1.2".parse::<FirmwareVersion>().is_err());
        assert!("1.2.3.4".parse::<FirmwareVersion>().is_err());
        assert!("1.x.3".parse::<FirmwareVersion>().is_err());
    }
}
