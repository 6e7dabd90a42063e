/// Authentication Routes
///
/// Registration, login, logout, token refresh, password reset, password
/// change and the current-user endpoint. Handlers only translate HTTP to `AuthService`
/// calls; errors are rendered by `AppError`.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthService, Claims, RequestContext};
use crate::error::{AppError, AuthError};
use crate::security::{client_addr, RateLimiterManager};
use crate::store::User;

pub const FORGOT_PASSWORD_MESSAGE: &str = "If the email exists, a reset link was sent.";
pub const PASSWORD_UPDATED_MESSAGE: &str = "Password updated";
pub const LOGGED_OUT_MESSAGE: &str = "Logged out";
pub const LOGOUT_REJECTED_MESSAGE: &str = "Invalid token or already revoked";

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default, alias = "full_name")]
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `/auth/refresh` and `/auth/logout`
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email,
            name: user.name,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct DetailResponse {
    pub detail: &'static str,
}

fn request_context(req: &HttpRequest) -> RequestContext {
    RequestContext::new(client_addr(req))
}

/// Applies the per-client limit before building the context.
fn limited_context(req: &HttpRequest, limiter: &RateLimiterManager) -> Result<RequestContext, AppError> {
    let ctx = request_context(req);
    limiter.check_rate_limit(ctx.client_addr.as_deref().unwrap_or("unknown"))?;
    Ok(ctx)
}

/// POST /auth/register
///
/// # Errors
/// - 400: invalid email, weak password or invalid name
/// - 409: email already registered (after normalisation)
/// - 429: rate limited
pub async fn register(
    req: HttpRequest,
    form: web::Json<RegisterRequest>,
    service: web::Data<AuthService>,
    limiter: web::Data<RateLimiterManager>,
) -> Result<HttpResponse, AppError> {
    let ctx = limited_context(&req, &limiter)?;
    let form = form.into_inner();

    let user = service
        .register(&ctx, &form.email, &form.password, form.name.as_deref())
        .await?;

    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

/// POST /auth/login
///
/// # Errors
/// - 401: unknown email or wrong password, indistinguishable
/// - 403: account locked or inactive
/// - 429: rate limited
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    service: web::Data<AuthService>,
    limiter: web::Data<RateLimiterManager>,
) -> Result<HttpResponse, AppError> {
    let ctx = limited_context(&req, &limiter)?;

    let tokens = service.login(&ctx, &form.email, &form.password).await?;

    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /auth/refresh
///
/// Rotates the presented refresh token. Presenting it a second time fails.
pub async fn refresh(
    req: HttpRequest,
    form: web::Json<RefreshRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let ctx = request_context(&req);

    let tokens = service.refresh(&ctx, &form.refresh_token).await?;

    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /auth/logout
pub async fn logout(
    req: HttpRequest,
    form: web::Json<RefreshRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let ctx = request_context(&req);

    match service.logout(&ctx, &form.refresh_token).await {
        Ok(()) => Ok(HttpResponse::Ok().json(DetailResponse {
            detail: LOGGED_OUT_MESSAGE,
        })),
        Err(AppError::Auth(AuthError::RefreshRejected(_))) => {
            Ok(HttpResponse::BadRequest().json(DetailResponse {
                detail: LOGOUT_REJECTED_MESSAGE,
            }))
        }
        Err(e) => Err(e),
    }
}

/// POST /auth/forgot-password
///
/// Always 200 with the same body, whether or not the email exists.
pub async fn forgot_password(
    req: HttpRequest,
    form: web::Json<ForgotPasswordRequest>,
    service: web::Data<AuthService>,
    limiter: web::Data<RateLimiterManager>,
) -> Result<HttpResponse, AppError> {
    let ctx = limited_context(&req, &limiter)?;

    service.forgot_password(&ctx, &form.email).await;

    Ok(HttpResponse::Ok().json(DetailResponse {
        detail: FORGOT_PASSWORD_MESSAGE,
    }))
}

/// POST /auth/reset-password
///
/// # Errors
/// - 400: unknown, expired or used token (one message for all), or weak password
/// - 429: rate limited
pub async fn reset_password(
    req: HttpRequest,
    form: web::Json<ResetPasswordRequest>,
    service: web::Data<AuthService>,
    limiter: web::Data<RateLimiterManager>,
) -> Result<HttpResponse, AppError> {
    let ctx = limited_context(&req, &limiter)?;

    service
        .reset_password(&ctx, &form.token, &form.new_password)
        .await?;

    Ok(HttpResponse::Ok().json(DetailResponse {
        detail: PASSWORD_UPDATED_MESSAGE,
    }))
}

/// POST /api/change-password
///
/// Requires a bearer access token. Revokes every refresh token of the user.
///
/// # Errors
/// - 400: weak new password
/// - 401: wrong current password
/// - 429: rate limited
pub async fn change_password(
    req: HttpRequest,
    claims: web::ReqData<Claims>,
    form: web::Json<ChangePasswordRequest>,
    service: web::Data<AuthService>,
    limiter: web::Data<RateLimiterManager>,
) -> Result<HttpResponse, AppError> {
    let ctx = limited_context(&req, &limiter)?;
    let user_id = claims.user_id()?;

    service
        .change_password(&ctx, user_id, &form.current_password, &form.new_password)
        .await?;

    Ok(HttpResponse::Ok().json(DetailResponse {
        detail: PASSWORD_UPDATED_MESSAGE,
    }))
}

/// GET /api/me
///
/// Requires `Authorization: Bearer <access_token>`; claims are injected by
/// `JwtMiddleware`.
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;

    let user = service.current_user(user_id).await?;

    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}
