use serde::Deserialize;

use crate::models::Role;

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}
