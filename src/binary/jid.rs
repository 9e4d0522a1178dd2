use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BinaryError;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const LID_SERVER: &str = "lid";
pub const NEWSLETTER_SERVER: &str = "newsletter";
pub const LEGACY_USER_SERVER: &str = "c.us";

/// WhatsApp identifier `user[_agent][:device]@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
    pub agent: Option<u8>,
    pub device: Option<u8>,
}

impl Jid {
    /// Builds a plain user@server identifier.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            agent: None,
            device: None,
        }
    }

    /// Builds a device-qualified identifier.
    pub fn with_device(user: impl Into<String>, server: impl Into<String>, device: u8) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            agent: None,
            device: Some(device),
        }
    }

    /// True when the identifier needs the agent/device wire encoding.
    pub fn is_ad(&self) -> bool {
        self.device.is_some() || self.agent.is_some() || self.server == LID_SERVER
    }

    /// The identifier without device and agent qualifiers.
    pub fn to_user_jid(&self) -> Jid {
        Jid::new(self.user.clone(), self.server.clone())
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user)?;
        if let Some(agent) = self.agent {
            write!(f, "_{agent}")?;
        }
        if let Some(device) = self.device {
            if device > 0 {
                write!(f, ":{device}")?;
            }
        }
        write!(f, "@{}", self.server)
    }
}

impl FromStr for Jid {
    type Err = BinaryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = raw
            .split_once('@')
            .ok_or_else(|| BinaryError::InvalidJid(raw.to_owned()))?;
        if server.is_empty() || server.contains('@') {
            return Err(BinaryError::InvalidJid(raw.to_owned()));
        }

        let (user_agent, device) = match user_part.split_once(':') {
            Some((prefix, device_raw)) => {
                let device = device_raw
                    .parse::<u8>()
                    .map_err(|_| BinaryError::InvalidJid(raw.to_owned()))?;
                (prefix, Some(device))
            }
            None => (user_part, None),
        };

        let (user, agent) = match user_agent.split_once('_') {
            Some((prefix, agent_raw)) => {
                let agent = agent_raw
                    .parse::<u8>()
                    .map_err(|_| BinaryError::InvalidJid(raw.to_owned()))?;
                (prefix, Some(agent))
            }
            None => (user_agent, None),
        };

        Ok(Jid {
            user: user.to_owned(),
            server: server.to_owned(),
            agent,
            device,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_user_jid() {
        let jid: Jid = "5511999999999@s.whatsapp.net".parse().expect("jid");
        assert_eq!(jid.user, "5511999999999");
        assert_eq!(jid.server, DEFAULT_USER_SERVER);
        assert!(!jid.is_ad());
    }

    #[test]
    fn parses_device_and_agent_qualifiers() {
        let jid: Jid = "123_2:4@lid".parse().expect("jid");
        assert_eq!(jid.user, "123");
        assert_eq!(jid.agent, Some(2));
        assert_eq!(jid.device, Some(4));
        assert!(jid.is_ad());
        assert_eq!(jid.to_string(), "123_2:4@lid");
    }

    #[test]
    fn empty_user_round_trips() {
        let jid: Jid = "@s.whatsapp.net".parse().expect("jid");
        assert_eq!(jid.user, "");
        assert_eq!(jid.to_string(), "@s.whatsapp.net");
    }

    #[test]
    fn rejects_missing_server() {
        assert!("no-at-sign".parse::<Jid>().is_err());
        assert!("user@".parse::<Jid>().is_err());
    }
}
