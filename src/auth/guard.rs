use crate::models::session::Session;
use crate::models::user::Role;

/// Where access-denied navigation lands.
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

/// Access rule attached to a protected route.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RouteAccess {
    /// Any signed-in user.
    #[default]
    Authenticated,
    /// Exactly this role.
    Require(Role),
    /// Any of these roles.
    AllowOnly(Vec<Role>),
}

/// Outcome of guarding one navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session state is still resolving; show a placeholder.
    Loading,
    /// Not signed in; start the login flow.
    LoginRedirect,
    /// Signed in but not permitted.
    Redirect(&'static str),
    Render,
}

/// Decides what a protected route shows for the given session.
///
/// # Arguments
///
/// * `session` - The current session.
/// * `access` - The route's access rule.
///
/// # Returns
///
/// The [`GuardDecision`] for this navigation. Loading always wins, whatever
/// the authentication flag says.
pub fn evaluate(session: &Session, access: &RouteAccess) -> GuardDecision {
    if session.is_loading() {
        return GuardDecision::Loading;
    }
    let user = match session.user() {
        Some(user) if session.is_authenticated() => user,
        _ => return GuardDecision::LoginRedirect,
    };

    let permitted = match access {
        RouteAccess::Authenticated => true,
        RouteAccess::Require(role) => user.role == *role,
        RouteAccess::AllowOnly(roles) => roles.contains(&user.role),
    };

    if permitted {
        GuardDecision::Render
    } else {
        GuardDecision::Redirect(UNAUTHORIZED_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::User;

    fn session_as(role: Role) -> Session {
        let user = User {
            role,
            ..User::new("u-1", "ana@nextera.com", "Ana", "Silva")
        };
        Session::signed_in(user, Some("t".to_string()))
    }

    fn managers() -> RouteAccess {
        RouteAccess::AllowOnly(vec![Role::Manager, Role::Administrator])
    }

    #[test]
    fn allowed_roles_gate_employees_out() {
        assert_eq!(
            evaluate(&session_as(Role::Employee), &managers()),
            GuardDecision::Redirect(UNAUTHORIZED_PATH)
        );
        assert_eq!(evaluate(&session_as(Role::Manager), &managers()), GuardDecision::Render);
    }

    #[test]
    fn required_role_is_an_exact_match() {
        let admin_only = RouteAccess::Require(Role::Administrator);
        assert_eq!(
            evaluate(&session_as(Role::Manager), &admin_only),
            GuardDecision::Redirect(UNAUTHORIZED_PATH)
        );
        assert_eq!(
            evaluate(&session_as(Role::Administrator), &admin_only),
            GuardDecision::Render
        );
    }

    #[test]
    fn authenticated_only_admits_every_role() {
        for role in [Role::Employee, Role::Manager, Role::Administrator] {
            assert_eq!(
                evaluate(&session_as(role), &RouteAccess::Authenticated),
                GuardDecision::Render
            );
        }
    }

    #[test]
    fn signed_out_session_starts_login() {
        assert_eq!(
            evaluate(&Session::signed_out(), &RouteAccess::Authenticated),
            GuardDecision::LoginRedirect
        );
    }

    #[test]
    fn loading_wins_regardless_of_authentication() {
        let mut signed_in = session_as(Role::Administrator);
        signed_in.set_loading(true);
        let mut signed_out = Session::signed_out();
        signed_out.set_loading(true);

        for session in [signed_in, signed_out] {
            assert_eq!(evaluate(&session, &managers()), GuardDecision::Loading);
        }
    }
}
