use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt};

/// Validates CONNECT credentials.
///
/// The CONNECT handler awaits the returned future before answering, so
/// providers may consult external services.
pub trait AuthenticationProvider: Send + Sync {
    fn authenticate<'a>(
        &'a self,
        login: Option<&'a str>,
        passcode: Option<&'a str>,
    ) -> BoxFuture<'a, bool>;
}

/// In-memory login → passcode table.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.users.insert(login.into(), passcode.into());
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl<L, P> FromIterator<(L, P)> for StaticCredentials
where
    L: Into<String>,
    P: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (L, P)>>(iter: I) -> Self {
        Self {
            users: iter
                .into_iter()
                .map(|(l, p)| (l.into(), p.into()))
                .collect(),
        }
    }
}

impl AuthenticationProvider for StaticCredentials {
    fn authenticate<'a>(
        &'a self,
        login: Option<&'a str>,
        passcode: Option<&'a str>,
    ) -> BoxFuture<'a, bool> {
        let accepted = match (login, passcode) {
            (Some(login), Some(passcode)) => {
                self.users.get(login).is_some_and(|p| p == passcode)
            }
            _ => false,
        };
        futures::future::ready(accepted).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials() {
        let creds = StaticCredentials::new().with_user("guest", "guest");
        assert!(creds.authenticate(Some("guest"), Some("guest")).await);
        assert!(!creds.authenticate(Some("guest"), Some("wrong")).await);
        assert!(!creds.authenticate(Some("nobody"), Some("guest")).await);
        assert!(!creds.authenticate(None, None).await);
    }

    #[test]
    fn collect_from_pairs() {
        let creds: StaticCredentials = vec![("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(creds.len(), 2);
    }
}
