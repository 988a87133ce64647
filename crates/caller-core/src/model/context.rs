// ── Session context: who is signed in, and where ──

use serde::{Deserialize, Serialize};

use super::de;

/// The organization (clinic) a station is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
    #[serde(default, deserialize_with = "de::lenient_i64")]
    pub org_id: i64,
    #[serde(default)]
    pub org_code: String,
    #[serde(default)]
    pub org_name: String,
    #[serde(default, deserialize_with = "de::lenient_i64")]
    pub dept_id: i64,
}

/// The signed-in doctor. `id` doubles as the doctor id on every queue call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, deserialize_with = "de::lenient_i64")]
    pub id: i64,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub nick_name: String,
}

impl User {
    /// Name shown on beacons and screens, falling back to the account.
    pub fn display_name(&self) -> &str {
        if self.nick_name.is_empty() {
            &self.account
        } else {
            &self.nick_name
        }
    }
}

/// Consultation room assigned to this station.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    #[serde(default, deserialize_with = "de::lenient_i64")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "department_id", deserialize_with = "de::lenient_i64")]
    pub dept_id: i64,
    #[serde(default, deserialize_with = "de::lenient_i64")]
    pub room_type: i64,
    #[serde(default)]
    pub location: String,
}

/// Everything a session is bound to. Mutated only through the session's
/// `set_org` / `set_user` / `set_room` / `logout`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub org: Option<Org>,
    pub user: Option<User>,
    pub room: Option<Room>,
}

impl SessionContext {
    pub fn doctor_id(&self) -> Option<i64> {
        self.user.as_ref().map(|u| u.id)
    }

    pub fn org_code(&self) -> Option<&str> {
        self.org.as_ref().map(|o| o.org_code.as_str())
    }

    /// Department for reassignment queries: the org binding first, then
    /// the room's department.
    pub fn dept_id(&self) -> Option<i64> {
        self.org
            .as_ref()
            .map(|o| o.dept_id)
            .filter(|id| *id != 0)
            .or_else(|| self.room.as_ref().map(|r| r.dept_id).filter(|id| *id != 0))
    }

    pub fn is_bound(&self) -> bool {
        self.org.is_some() && self.user.is_some()
    }
}
