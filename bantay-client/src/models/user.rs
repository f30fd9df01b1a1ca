#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct UserCounts {
    pub total: usize,
    pub admin: usize,
}

impl UserCounts {
    pub fn from_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        roles.into_iter().fold(Self::default(), |mut counts, role| {
            counts.total += 1;
            if role == Role::Admin {
                counts.admin += 1;
            }
            counts
        })
    }
}
