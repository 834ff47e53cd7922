use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;

use crate::models::User;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub first_name: String,
    pub surname: String,
    pub is_staff: bool,
}

// Basic Auth extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Получаем заголовок Authorization
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Проверяем что это Basic auth
        let encoded = auth_header
            .strip_prefix("Basic ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Декодируем base64
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

        // Разделяем email:password
        let mut parts = credentials.splitn(2, ':');
        let email = parts.next().ok_or(StatusCode::UNAUTHORIZED)?;
        let password = parts.next().ok_or(StatusCode::UNAUTHORIZED)?;

        let user = User::find_by_email(email, &state.db)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        if !user.is_active || !user.verify_password(password) {
            return Err(StatusCode::UNAUTHORIZED);
        }

        // Обновляем last_logged_in
        sqlx::query("UPDATE users SET last_logged_in = NOW() WHERE user_id = $1")
            .bind(user.user_id)
            .execute(&state.db.pool)
            .await
            .ok(); // Игнорируем ошибку обновления

        Ok(AuthUser {
            user_id: user.user_id,
            email: user.email,
            first_name: user.first_name,
            surname: user.surname,
            is_staff: user.is_staff,
        })
    }
}

/// Staff-only wrapper: same Basic Auth, plus the `is_staff` flag.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl FromRequestParts<Arc<crate::AppState>> for AdminUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff {
            return Err(StatusCode::FORBIDDEN);
        }
        Ok(AdminUser(user))
    }
}
