use crate::config::AppConfig;
use crate::models::{Role, User};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub user: User,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

/// Where the app should land after startup or sign-in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    Login,
    /// Dashboard, region board, settings.
    AdminHome,
    /// Alerts, happenings, news, settings.
    UserHome,
}

/// Everything screens share, passed to them explicitly.
#[derive(Clone, Debug)]
pub struct AppContext {
    config: AppConfig,
    theme: Theme,
    session: Option<Session>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            theme: Theme::default(),
            session: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn is_dark_mode(&self) -> bool {
        self.theme == Theme::Dark
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.theme
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn sign_in(&mut self, session: Session) -> Destination {
        log::info!(
            "Signed in as {} ({:?})",
            session.user.email,
            session.user.role
        );
        self.session = Some(session);
        self.home_destination()
    }

    pub fn sign_out(&mut self) -> Destination {
        if let Some(session) = self.session.take() {
            log::info!("Signed out {}", session.user.email);
        }
        self.home_destination()
    }

    pub fn home_destination(&self) -> Destination {
        match &self.session {
            None => Destination::Login,
            Some(session) if session.is_admin() => Destination::AdminHome,
            Some(_) => Destination::UserHome,
        }
    }
}
