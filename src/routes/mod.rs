mod auth;
mod health_check;

pub use auth::{
    change_password, forgot_password, get_current_user, login, logout, refresh, register, reset_password,
    FORGOT_PASSWORD_MESSAGE, LOGGED_OUT_MESSAGE, LOGOUT_REJECTED_MESSAGE, PASSWORD_UPDATED_MESSAGE,
};
pub use health_check::health_check;
