use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// An account that may own books and cast votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Unix seconds
    pub created_at: i64,
}

impl Account {
    pub fn new(name: String, email: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            name,
            email,
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    /// Field-level problems, empty when the account may be stored.
    pub fn problems(&self) -> Vec<(&'static str, &'static str)> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push(("name", "must not be empty"));
        }
        if !self.email.contains('@') {
            problems.push(("email", "must contain '@'"));
        }
        problems
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccount {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAccount {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UpdateAccount {
    pub fn apply_to(self, mut account: Account) -> Account {
        if let Some(name) = self.name {
            account.name = name;
        }
        if let Some(email) = self.email {
            account.email = email;
        }
        account
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problems_name_each_bad_field() {
        let account = Account::new(" ".into(), "nobody".into());
        let fields: Vec<_> = account.problems().into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["name", "email"]);

        assert!(Account::new("Ada".into(), "ada@example.com".into())
            .problems()
            .is_empty());
    }

    #[test]
    fn update_keeps_absent_fields() {
        let account = Account::new("Ada".into(), "ada@example.com".into());
        let updated = UpdateAccount {
            name: Some("Ada L.".into()),
            email: None,
        }
        .apply_to(account.clone());

        assert_eq!(updated.name, "Ada L.");
        assert_eq!(updated.email, account.email);
        assert_eq!(updated.id, account.id);
    }
}
