use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use examgate_core::api::{ApiClient, ApiError, HttpTransport, RequestGate};
use examgate_core::auth::{CredentialStore, SessionState};
use examgate_core::clock::{Clock, SystemClock};
use examgate_core::config::Config;
use examgate_core::exam::{section_path, ExamRunner, SectionKind};
use examgate_core::nav::{Navigator, RouteTable, Router, LANDING_PATH, LOGIN_PATH};
use examgate_core::store::{DurableStore, FileStore};
use examgate_core::timer::UnloadRegistry;
use examgate_core::utils::{format_remaining, format_session_left, truncate_string};

use crate::screen::{self, SectionExit};

/// Width used when listing tests
const LIST_WIDTH: usize = 60;

pub struct App {
    config: Config,
    clock: Arc<dyn Clock>,
    session: Arc<SessionState>,
    router: Router,
    api: ApiClient,
    runner: ExamRunner,
    unload: UnloadRegistry,
}

impl App {
    /// Wire the client together and pick up any stored session.
    pub fn new(config: Config, cache_dir: &Path) -> Result<Self> {
        let store: Arc<dyn DurableStore> = Arc::new(FileStore::new(cache_dir)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let navigator = Arc::new(Navigator::default());

        let session = Arc::new(SessionState::new(store.clone(), clock.clone(), navigator.clone()));
        session.refresh_from_storage();
        debug!(authenticated = session.claims().is_some(), "Session loaded");

        let router = Router::new(RouteTable::default(), session.clone(), navigator);
        let transport = Arc::new(HttpTransport::new(&config.api_base_url)?);
        let api = ApiClient::new(RequestGate::new(session.clone(), transport));
        let unload = UnloadRegistry::new();
        let runner = ExamRunner::new(
            api.clone(),
            store,
            clock.clone(),
            unload.clone(),
            config.section_durations,
        );

        Ok(Self {
            config,
            clock,
            session,
            router,
            api,
            runner,
            unload,
        })
    }

    /// Move to `path` if the guard allows it. Prints where the user was sent
    /// instead and returns false otherwise.
    fn enter(&self, path: &str) -> Result<bool> {
        let outcome = self.router.navigate(path)?;
        if !outcome.redirected {
            return Ok(true);
        }
        if outcome.location == LOGIN_PATH {
            println!("You are not signed in. Run `examgate login` first.");
        } else {
            println!("Your account cannot open {}.", path);
        }
        Ok(false)
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    pub async fn login(&mut self, email: Option<&str>) -> Result<()> {
        println!("\n=== examgate login ===\n");

        let username = match email {
            Some(email) => email.to_string(),
            None => self.prompt_username()?,
        };
        if username.is_empty() {
            anyhow::bail!("Email is required");
        }

        let password = if CredentialStore::has_credentials(&username) {
            print!("Use stored password? [Y/n]: ");
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;

            if input.trim().to_lowercase() != "n" {
                CredentialStore::get_password(&username)?
            } else {
                Self::prompt_password()?
            }
        } else {
            Self::prompt_password()?
        };

        println!("\nAuthenticating...");

        let claims = match self.api.login(&username, &password).await {
            Ok(claims) => claims,
            Err(e) => {
                let invalid = e
                    .chain()
                    .any(|c| matches!(c.downcast_ref::<ApiError>(), Some(ApiError::InvalidCredentials)));
                if invalid {
                    anyhow::bail!("Invalid email or password");
                }
                return Err(e);
            }
        };

        if let Err(e) = CredentialStore::store(&username, &password) {
            warn!(error = %e, "Failed to store credentials");
        }
        self.config.last_username = Some(username);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        let outcome = self.router.navigate(LANDING_PATH)?;
        info!(location = %outcome.location, "Login successful");
        println!(
            "Signed in as {} ({}). Session valid for {}.",
            claims.subject,
            claims.roles.join(", "),
            format_session_left(claims.seconds_until_expiry(self.clock.now_ms()))
        );
        Ok(())
    }

    fn prompt_username(&self) -> Result<String> {
        match &self.config.last_username {
            Some(last_user) => print!("Email [{}]: ", last_user),
            None => print!("Email: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        Ok(match (&self.config.last_username, input.is_empty()) {
            (Some(last_user), true) => last_user.clone(),
            _ => input.to_string(),
        })
    }

    fn prompt_password() -> Result<String> {
        let password = rpassword::prompt_password("Password: ")?;
        Ok(password)
    }

    pub fn logout(&mut self, forget: bool) {
        self.session.logout();
        println!("Signed out.");
        if !forget {
            return;
        }

        let Some(username) = self.config.last_username.take() else {
            println!("No remembered account.");
            return;
        };
        match CredentialStore::delete(&username) {
            Ok(()) => println!("Forgot the stored password for {}.", username),
            Err(e) => {
                warn!(error = %e, "Failed to delete credentials");
                println!("No stored password for {}.", username);
            }
        }
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }

    pub async fn register(&self, email: &str, name: Option<&str>) -> Result<()> {
        if !self.enter("/register")? {
            return Ok(());
        }

        let password = Self::prompt_password()?;
        let confirm = rpassword::prompt_password("Repeat password: ")?;
        if password != confirm {
            anyhow::bail!("Passwords do not match");
        }

        let mut user = json!({ "email": email, "password": password });
        if let Some(name) = name {
            user["name"] = json!(name);
        }
        self.api.register(&user).await?;
        info!(email, "Account registered");
        println!("Account created. Sign in with: examgate login {}", email);
        Ok(())
    }

    pub fn status(&self) -> Result<()> {
        self.session.refresh_from_storage();
        match self.session.claims() {
            Some(claims) => {
                println!("Signed in as {}", claims.subject);
                println!("Roles: {}", claims.roles.join(", "));
                let left = format_session_left(claims.seconds_until_expiry(self.clock.now_ms()));
                match claims.expires_at() {
                    Some(at) => println!("Session ends {} (in {})", at.format("%Y-%m-%d %H:%M UTC"), left),
                    None => println!("Session ends in {}", left),
                }
            }
            None => println!("Not signed in."),
        }

        let pending = self.runner.pending_deadlines()?;
        if !pending.is_empty() {
            println!("\nSection clocks:");
            for deadline in pending {
                let left = if deadline.remaining_secs > 0 {
                    format!("{} left", format_remaining(deadline.remaining_secs))
                } else {
                    "time is up".to_string()
                };
                println!("  {:<40} {}", deadline.key, left);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Test room
    // =========================================================================

    pub async fn list_tests(&self) -> Result<()> {
        if !self.enter("/tests")? {
            return Ok(());
        }
        let tests = self.api.available_tests().await?;
        if tests.is_empty() {
            println!("No tests are open to you right now.");
            return Ok(());
        }
        for test in &tests {
            println!("{:>6}  {}", field(test, &["id"]), truncate_string(&title(test), LIST_WIDTH));
        }
        Ok(())
    }

    pub async fn start_attempt(&self, scheduled_test_id: &str) -> Result<()> {
        if !self.enter("/tests")? {
            return Ok(());
        }
        let attempt = self.api.start_test_attempt(scheduled_test_id).await?;
        let id = attempt.id();
        info!(scheduled_test_id, attempt_id = %id, "Attempt started");
        println!("Attempt {} started.", id);
        println!("Open the first section with: examgate section {} listening", id);
        Ok(())
    }

    pub async fn run_section(
        &self,
        attempt_id: &str,
        kind: SectionKind,
        answers_file: Option<&Path>,
    ) -> Result<()> {
        if !self.enter(&section_path(attempt_id, kind))? {
            return Ok(());
        }

        let answers = answers_file.map(read_answers).transpose()?;
        let mut section = self.runner.enter_section(attempt_id, kind).await?;
        if let Some(answers) = answers {
            section.set_answers(answers);
        }

        if section.is_expired() {
            println!("Time for the {} section is already up, submitting.", kind.display_name());
            section.submit_on_expire().await?;
            println!("Section submitted.");
            return Ok(());
        }

        match screen::run(section, &self.unload).await? {
            SectionExit::Submitted => println!("{} section submitted.", kind.display_name()),
            SectionExit::TimeUp => {
                println!("Time is up. The {} section was submitted.", kind.display_name())
            }
            SectionExit::Left => println!(
                "Left the {} section. Its clock keeps running; reopen it with: examgate section {} {}",
                kind.display_name(),
                attempt_id,
                kind.route_segment()
            ),
        }
        Ok(())
    }

    pub async fn finish_attempt(&self, attempt_id: &str) -> Result<()> {
        if !self.enter("/tests")? {
            return Ok(());
        }
        let result = self.api.finish_test_attempt(attempt_id).await?;
        info!(attempt_id, "Attempt finished");
        match result {
            Value::Null => println!("Attempt {} finished.", attempt_id),
            other => println!("Attempt {} finished: {}", attempt_id, other),
        }
        Ok(())
    }
}

fn read_answers(path: &Path) -> Result<Map<String, Value>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read answers from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("{} must hold a JSON object of answers", path.display()))
}

fn field(value: &Value, names: &[&str]) -> String {
    names
        .iter()
        .find_map(|name| value.get(*name))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

fn title(test: &Value) -> String {
    let title = field(test, &["title", "name"]);
    if !title.is_empty() {
        return title;
    }
    // Scheduled tests nest their template
    test.get("testTemplate")
        .map(|t| field(t, &["title", "name"]))
        .unwrap_or_default()
}
