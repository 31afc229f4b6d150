// Resource shapes used by the console front end

use serde::{Deserialize, Serialize};

/// Tenant the user can switch into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

/// Organization membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Anything addressable by a string id
pub trait Identified {
    fn id(&self) -> &str;
}

impl Identified for Organization {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for Member {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Remove the items whose id equals `id`, keeping everything else in order.
/// Returns how many were removed.
pub fn remove_by_id<T: Identified>(items: &mut Vec<T>, id: &str) -> usize {
    let before = items.len();
    items.retain(|item| item.id() != id);
    before - items.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> Member {
        Member {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            role: None,
        }
    }

    #[test]
    fn test_remove_by_id_removes_only_target() {
        let mut members = vec![member("m1"), member("m2"), member("m3")];
        assert_eq!(remove_by_id(&mut members, "m2"), 1);

        let ids: Vec<&str> = members.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
    }

    #[test]
    fn test_remove_by_id_unknown_id_keeps_list() {
        let mut members = vec![member("m1"), member("m2")];
        assert_eq!(remove_by_id(&mut members, "nope"), 0);
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_member_role_is_optional() {
        let parsed: Member =
            serde_json::from_str(r#"{"id":"m1","email":"a@example.com"}"#).unwrap();
        assert_eq!(parsed.role, None);
    }

    #[test]
    fn test_organization_roundtrip_shape() {
        let org: Organization = serde_json::from_str(r#"{"id":"o1","name":"Acme"}"#).unwrap();
        assert_eq!(org.id(), "o1");
        assert_eq!(org.name, "Acme");
    }
}
