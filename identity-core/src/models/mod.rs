pub mod permission;
pub mod role;
pub mod user;

pub use permission::{Operation, Permission, PermissionSet, Requirement, codes};
pub use role::{CreateRoleRequest, Role, RoleId};
pub use user::{
    Account, AccountChanges, AccountFilter, AccountResponse, AccountStats, NewAccount,
    NewPrincipalRecord, Principal, PrincipalId, Profile, ProfileFields,
};
