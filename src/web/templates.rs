use askama::Template;

#[derive(Template)]
#[template(path = "landing.html")]
pub struct LandingTemplate {
    pub display_name: Option<String>,
    /// Embed the hidden silent check iframe
    pub silent_check: bool,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

#[derive(Template)]
#[template(path = "admin.html")]
pub struct AdminTemplate {
    pub username: String,
    pub expires_in_secs: i64,
}

#[derive(Template)]
#[template(path = "access_denied.html")]
pub struct AccessDeniedTemplate {
    pub username: Option<String>,
    pub roles: Vec<String>,
}
