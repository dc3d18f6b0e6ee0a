use keyring::Entry;

const SERVICE: &str = "marketsync";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no access token stored for {0}")]
    Missing(String),
    #[error("refusing to store an empty access token")]
    Empty,
    #[error("keyring unavailable for {key}: {source}")]
    Backend {
        key: String,
        #[source]
        source: keyring::Error,
    },
}

/// One bearer token slot in the OS keyring, scoped to an account on an API host.
pub struct TokenEntry {
    key: String,
    entry: Entry,
}

impl TokenEntry {
    pub fn open(account: &str, api_host: &str) -> Result<Self, CredentialError> {
        let key = format!("{account}@{api_host}");
        let entry = Entry::new(SERVICE, &key).map_err(|source| CredentialError::Backend {
            key: key.clone(),
            source,
        })?;
        Ok(TokenEntry { key, entry })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn classify(&self, e: keyring::Error) -> CredentialError {
        match e {
            keyring::Error::NoEntry => CredentialError::Missing(self.key.clone()),
            source => CredentialError::Backend {
                key: self.key.clone(),
                source,
            },
        }
    }

    /// The stored token. A blank entry counts as missing.
    pub fn load(&self) -> Result<String, CredentialError> {
        let token = self.entry.get_password().map_err(|e| self.classify(e))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Missing(self.key.clone()));
        }
        log::debug!("Access token for {} read from keyring", self.key);
        Ok(token.to_string())
    }

    pub fn store(&self, token: &str) -> Result<(), CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Empty);
        }
        self.entry
            .set_password(token)
            .map_err(|e| self.classify(e))?;
        log::info!("Access token for {} saved to keyring", self.key);
        Ok(())
    }

    /// Forget the token. Returns false if nothing was stored.
    pub fn remove(&self) -> Result<bool, CredentialError> {
        match self.entry.delete_credential() {
            Ok(()) => {
                log::info!("Access token for {} removed from keyring", self.key);
                Ok(true)
            }
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(self.classify(e)),
        }
    }
}

pub fn get_credential(account: &str, api_host: &str) -> Result<String, CredentialError> {
    TokenEntry::open(account, api_host)?.load()
}

pub fn set_credential(account: &str, api_host: &str, token: &str) -> Result<(), CredentialError> {
    TokenEntry::open(account, api_host)?.store(token)
}

pub fn delete_credential(account: &str, api_host: &str) -> Result<bool, CredentialError> {
    TokenEntry::open(account, api_host)?.remove()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_store() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
    }

    #[test]
    fn entry_is_scoped_to_account_and_host() {
        mock_store();
        let entry = TokenEntry::open("ana", "api.example.com").unwrap();
        assert_eq!(entry.key(), "ana@api.example.com");
    }

    #[test]
    fn empty_entry_reads_as_missing() {
        mock_store();
        let entry = TokenEntry::open("ana", "api.example.com").unwrap();
        match entry.load() {
            Err(CredentialError::Missing(key)) => assert_eq!(key, "ana@api.example.com"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!entry.remove().unwrap());
    }

    #[test]
    fn token_is_trimmed_and_removable() {
        mock_store();
        let entry = TokenEntry::open("ana", "api.example.com").unwrap();
        assert!(matches!(entry.store("  \n"), Err(CredentialError::Empty)));

        entry.store(" tok-123\n").unwrap();
        assert_eq!(entry.load().unwrap(), "tok-123");
        assert!(entry.remove().unwrap());
        assert!(matches!(entry.load(), Err(CredentialError::Missing(_))));
    }
}
