use crate::connection::DEFAULT_TIMEOUT;
use crate::errors::*;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[cfg(feature = "serde_derive")]
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref SETTING_REGEX: Regex = Regex::new(r"^\s*(?P<key>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?P<value>.*?)\s*$").unwrap();
}

/// Account settings for one IMAP and one SMTP server.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde_derive", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde_derive", serde(default))]
pub struct Config {
    pub imap_server: String,
    pub imap_port: u16,
    pub imap_use_ssl: bool,
    pub imap_username: String,
    pub imap_password: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_use_ssl: bool,
    pub smtp_use_starttls: bool,
    pub smtp_username: String,
    pub smtp_password: String,
    pub email_address: String,
    pub display_name: String,
    /// Seconds before a stalled connect, read or write fails. 0 waits forever.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            imap_server: String::new(),
            imap_port: 993,
            imap_use_ssl: true,
            imap_username: String::new(),
            imap_password: String::new(),
            smtp_server: String::new(),
            smtp_port: 587,
            smtp_use_ssl: false,
            smtp_use_starttls: true,
            smtp_username: String::new(),
            smtp_password: String::new(),
            email_address: String::new(),
            display_name: String::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Parse `key = value` lines. Blank lines, `#` comments and unknown keys
    /// are skipped; missing keys keep their defaults.
    pub fn parse(text: &str) -> Result<Config> {
        let mut config = Config::default();

        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let caps = match SETTING_REGEX.captures(trimmed) {
                Some(caps) => caps,
                None => bail!(ErrorKind::Config(format!("line {}: expected key = value", index + 1))),
            };
            let key = &caps["key"];
            let value = &caps["value"];

            match key {
                "imap_server" => config.imap_server = value.to_string(),
                "imap_port" => config.imap_port = parse_port(value, index)?,
                "imap_use_ssl" => config.imap_use_ssl = parse_bool(value),
                "imap_username" => config.imap_username = value.to_string(),
                "imap_password" => config.imap_password = value.to_string(),
                "smtp_server" => config.smtp_server = value.to_string(),
                "smtp_port" => config.smtp_port = parse_port(value, index)?,
                "smtp_use_ssl" => config.smtp_use_ssl = parse_bool(value),
                "smtp_use_starttls" => config.smtp_use_starttls = parse_bool(value),
                "smtp_username" => config.smtp_username = value.to_string(),
                "smtp_password" => config.smtp_password = value.to_string(),
                "email_address" => config.email_address = value.to_string(),
                "display_name" => config.display_name = value.to_string(),
                "timeout_secs" => {
                    config.timeout_secs = value
                        .parse()
                        .map_err(|_| Error::from(ErrorKind::Config(format!("line {}: bad timeout '{}'", index + 1, value))))?
                }
                _ => debug!("Ignoring unknown setting '{}'", key),
            }
        }
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path)?;
        Config::parse(&text)
    }

    /// Check that the settings needed to reach both servers are present.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("imap_server", &self.imap_server),
            ("smtp_server", &self.smtp_server),
            ("email_address", &self.email_address),
        ];
        for &(name, value) in required.iter() {
            if value.trim().is_empty() {
                bail!(ErrorKind::Config(format!("{} is not set", name)));
            }
        }
        ensure!(self.imap_port != 0, ErrorKind::Config("imap_port must not be 0".to_string()));
        ensure!(self.smtp_port != 0, ErrorKind::Config("smtp_port must not be 0".to_string()));
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Value for the `From` header of outgoing mail.
    pub fn from_header(&self) -> String {
        if self.display_name.is_empty() {
            self.email_address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.email_address)
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("yes") || value.eq_ignore_ascii_case("true") || value == "1"
}

fn parse_port(value: &str, index: usize) -> Result<u16> {
    value
        .parse()
        .map_err(|_| ErrorKind::Config(format!("line {}: bad port '{}'", index + 1, value)).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# account\n\
                          imap_server = imap.example.com\n\
                          imap_port=143\n\
                          imap_use_ssl = no\n\
                          imap_username = alice\n\
                          imap_password = p@ss = word\n\
                          \n\
                          smtp_server = smtp.example.com\n\
                          smtp_use_starttls = yes\n\
                          email_address = alice@example.com\n\
                          display_name = Alice Example\n\
                          signature = unused\n";

    #[test]
    fn parses_settings_and_keeps_defaults() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.imap_server, "imap.example.com");
        assert_eq!(config.imap_port, 143);
        assert!(!config.imap_use_ssl);
        assert_eq!(config.imap_password, "p@ss = word");
        assert_eq!(config.smtp_port, 587);
        assert!(config.smtp_use_starttls);
        assert!(!config.smtp_use_ssl);
        assert_eq!(config.timeout(), Some(Duration::from_secs(60)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_port_names_the_line() {
        let err = Config::parse("imap_server = x\nimap_port = 99999\n").unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: line 2: bad port '99999'");
    }

    #[test]
    fn validate_requires_servers_and_address() {
        let mut config = Config::default();
        config.imap_server = "imap.example.com".to_string();
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: smtp_server is not set");
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = Config::parse("timeout_secs = 0").unwrap();
        assert_eq!(config.timeout(), None);
        assert_eq!(Config::default().timeout(), Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn from_header_uses_display_name_when_set() {
        let mut config = Config::default();
        config.email_address = "alice@example.com".to_string();
        assert_eq!(config.from_header(), "alice@example.com");
        config.display_name = "Alice".to_string();
        assert_eq!(config.from_header(), "Alice <alice@example.com>");
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.conf");
        fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.display_name, "Alice Example");
    }
}
