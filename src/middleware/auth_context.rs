use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::AppState;

/// app_user.roles
pub const ROLE_PATIENT: i16 = 0;
pub const ROLE_ADMIN: i16 = 1;
pub const ROLE_MANAGER: i16 = 2;
pub const ROLE_DOCTOR: i16 = 3;
pub const ROLE_RECEPTIONIST: i16 = 4;

pub fn is_staff_role(role: i16) -> bool {
    role != ROLE_PATIENT
}

/// Clinic staff member resolved from a bearer session token.
///
/// Patients holding a valid session are rejected with 403 so delivery
/// logs (which carry phone numbers) stay internal.
#[derive(Debug, Clone)]
pub struct StaffContext {
    pub user_id: Uuid,
    pub role: i16,
}

impl StaffContext {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    pub fn is_doctor(&self) -> bool {
        self.role == ROLE_DOCTOR
    }

    /// Front desk: books, moves and cancels appointments, sees every patient.
    pub fn is_front_desk(&self) -> bool {
        matches!(self.role, ROLE_ADMIN | ROLE_MANAGER | ROLE_RECEPTIONIST)
    }

    /// Writes visits, vital signs and prescriptions.
    pub fn is_clinician(&self) -> bool {
        matches!(self.role, ROLE_ADMIN | ROLE_DOCTOR)
    }

    pub fn require(&self, allowed: bool, message: &str) -> Result<(), ApiError> {
        if allowed {
            Ok(())
        } else {
            Err(ApiError::Forbidden("FORBIDDEN", message.to_string()))
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StaffSessionRow {
    user_id: Uuid,
    roles: i16,
}

async fn lookup_session(
    state: &AppState,
    token: &str,
) -> Result<Option<StaffSessionRow>, sqlx::Error> {
    sqlx::query_as::<_, StaffSessionRow>(
        r#"
        SELECT st.user_id, u.roles
        FROM session_token st
        JOIN app_user u ON u.user_id = st.user_id
        WHERE st.session_token_hash = $1
          AND st.revoked_at IS NULL
          AND st.expires_at > now()
          AND u.is_active = true
        "#,
    )
    .bind(hash_access_token(token))
    .fetch_optional(&state.db)
    .await
}

impl FromRequestParts<AppState> for StaffContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(bearer): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let session = lookup_session(state, bearer.token())
                .await
                .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
                .ok_or_else(ApiError::session_expired)?;

            if !is_staff_role(session.roles) {
                tracing::warn!(user_id = %session.user_id, "non-staff session refused");
                return Err(ApiError::Forbidden("FORBIDDEN", "staff only".into()));
            }

            Ok(StaffContext {
                user_id: session.user_id,
                role: session.roles,
            })
        }
    }
}
