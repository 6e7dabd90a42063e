use actix_web::dev::Server;
use actix_web::middleware::DefaultHeaders;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    change_password, forgot_password, get_current_user, health_check, login, logout, refresh, register,
    reset_password,
};
use crate::security::{RateLimitConfig, RateLimiterManager, SecurityHeaders};

fn security_headers() -> DefaultHeaders {
    SecurityHeaders::get_headers()
        .into_iter()
        .fold(DefaultHeaders::new(), |headers, header| headers.add(header))
}

pub fn run(
    listener: TcpListener,
    service: Arc<AuthService>,
    rate_limit: RateLimitConfig,
) -> Result<Server, std::io::Error> {
    let minter = service.minter();
    let service = web::Data::from(service);
    let limiter = web::Data::new(RateLimiterManager::new(rate_limit));
    let max_content_length = rate_limit.max_content_length;

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(security_headers())
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(service.clone())
            .app_data(limiter.clone())
            .app_data(web::JsonConfig::default().limit(max_content_length))

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout))
                    .route("/forgot-password", web::post().to(forgot_password))
                    .route("/reset-password", web::post().to(reset_password)),
            )

            // Protected routes (bearer access token required)
            .service(
                web::scope("/api")
                    .wrap(JwtMiddleware::new(minter.clone()))
                    .route("/me", web::get().to(get_current_user))
                    .route("/change-password", web::post().to(change_password)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
