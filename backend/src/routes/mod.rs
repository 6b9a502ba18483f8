/// Router Module Index
///
/// Routes are split by the access they require, and access control is
/// applied at the module level so no protected endpoint is exposed by
/// accident.

/// Routes accessible without an access token.
pub mod public;

/// Routes protected by the `AuthUser` extractor middleware.
pub mod authenticated;

/// Routes restricted to global admins.
pub mod admin;
