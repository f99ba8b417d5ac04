//! Broker credentials: fixed, from a passwd file, or randomly generated.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::{BrokerError, Result};

/// Characters used for random usernames and passwords.
pub const CREDENTIAL_CHARACTERS: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@$%^&*()_=+,./";

/// Characters used for random topic suffixes. Excludes the MQTT wildcards and
/// the level separator so a generated topic matches only itself.
pub const TOPIC_CHARACTERS: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-";

pub const USERNAME_LEN: usize = 20;
pub const PASSWORD_LEN: usize = 30;
pub const TOPIC_SUFFIX_LEN: usize = 40;

/// Entry written first by [`write_passwd_file`].
pub const FIXED_PASSWD_ENTRY: (&str, &str) = ("stresstest", "stressmeout");

const PASSWD_ENTRY_LEN: usize = 30;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Credentials handed out to connection positions round-robin.
#[derive(Clone, Debug, Default)]
pub struct CredentialPool {
    entries: Arc<Vec<Credentials>>,
}

impl CredentialPool {
    /// A pool that connects without credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn single(credentials: Credentials) -> Self {
        Self {
            entries: Arc::new(vec![credentials]),
        }
    }

    pub fn from_passwd_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::Credentials(format!("cannot read passwd file {}: {e}", path.display()))
        })?;
        Self::parse_passwd(&content)
    }

    /// Parse `user:password` lines. Blank lines and `#` comments are skipped.
    pub fn parse_passwd(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (username, password) = line.split_once(':').ok_or_else(|| {
                BrokerError::Credentials(format!(
                    "line {}: expected user:password",
                    number + 1
                ))
            })?;
            if username.is_empty() {
                return Err(BrokerError::Credentials(format!(
                    "line {}: empty username",
                    number + 1
                )));
            }
            entries.push(Credentials::new(username, Some(password.to_string())));
        }
        if entries.is_empty() {
            return Err(BrokerError::Credentials(
                "passwd file contains no entries".to_string(),
            ));
        }
        Ok(Self {
            entries: Arc::new(entries),
        })
    }

    /// Credentials for connection position `index`, or `None` when anonymous.
    pub fn for_index(&self, index: usize) -> Option<&Credentials> {
        if self.entries.is_empty() {
            None
        } else {
            self.entries.get(index % self.entries.len())
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn random_from(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

pub fn random_username() -> String {
    random_from(CREDENTIAL_CHARACTERS, USERNAME_LEN)
}

pub fn random_password() -> String {
    random_from(CREDENTIAL_CHARACTERS, PASSWORD_LEN)
}

/// `prefix` followed by a random suffix, unique per connection pair in practice.
pub fn random_topic(prefix: &str) -> String {
    format!("{prefix}{}", random_from(TOPIC_CHARACTERS, TOPIC_SUFFIX_LEN))
}

/// Write a raw-text passwd file: the fixed stress-test entry followed by
/// `count` random alphanumeric `user:password` pairs.
pub fn write_passwd<W: Write>(out: &mut W, count: usize) -> Result<()> {
    let (user, pass) = FIXED_PASSWD_ENTRY;
    writeln!(out, "{user}:{pass}")?;
    let mut rng = rand::rng();
    for _ in 0..count {
        let user: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(PASSWD_ENTRY_LEN)
            .map(char::from)
            .collect();
        let pass: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(PASSWD_ENTRY_LEN)
            .map(char::from)
            .collect();
        writeln!(out, "{user}:{pass}")?;
    }
    Ok(())
}

pub fn write_passwd_file(path: &Path, count: usize) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut out = std::io::BufWriter::new(file);
    write_passwd(&mut out, count)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_lengths() {
        assert_eq!(random_username().len(), USERNAME_LEN);
        assert_eq!(random_password().len(), PASSWORD_LEN);

        let topic = random_topic("test/");
        assert!(topic.starts_with("test/"));
        assert_eq!(topic.len(), "test/".len() + TOPIC_SUFFIX_LEN);
        assert!(!topic["test/".len()..].contains(['+', '#', '/']));
    }

    #[test]
    fn test_random_topics_differ() {
        assert_ne!(random_topic("a/"), random_topic("a/"));
    }

    #[test]
    fn test_parse_passwd() {
        let pool = CredentialPool::parse_passwd(
            "# generated\nalice:secret\n\nbob:p:w\ncarol:\n",
        )
        .unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.for_index(0).unwrap().username, "alice");
        // Only the first colon separates user from password.
        assert_eq!(pool.for_index(1).unwrap().password.as_deref(), Some("p:w"));
        assert_eq!(pool.for_index(2).unwrap().password.as_deref(), Some(""));
        // Positions cycle through the entries.
        assert_eq!(pool.for_index(4).unwrap().username, "bob");
    }

    #[test]
    fn test_parse_passwd_rejects_malformed() {
        assert!(CredentialPool::parse_passwd("just-a-user\n").is_err());
        assert!(CredentialPool::parse_passwd(":nouser\n").is_err());
        assert!(CredentialPool::parse_passwd("# nothing\n\n").is_err());
    }

    #[test]
    fn test_anonymous_pool() {
        let pool = CredentialPool::anonymous();
        assert!(pool.is_empty());
        assert!(pool.for_index(3).is_none());
    }

    #[test]
    fn test_debug_masks_password() {
        let creds = Credentials::new("user", Some("hunter2".to_string()));
        let printed = format!("{creds:?}");
        assert!(printed.contains("user"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_passwd_file_round_trips_through_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rawtext.passwd");
        write_passwd_file(&path, 25).unwrap();

        let pool = CredentialPool::from_passwd_file(&path).unwrap();
        assert_eq!(pool.len(), 26);
        let first = pool.for_index(0).unwrap();
        assert_eq!(first.username, "stresstest");
        assert_eq!(first.password.as_deref(), Some("stressmeout"));
        let random = pool.for_index(1).unwrap();
        assert_eq!(random.username.len(), 30);
        assert!(random.username.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
