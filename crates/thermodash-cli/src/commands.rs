//! Command-line commands.
//!
//! Each command builds the session from the config, restores it from storage
//! and then talks to the API through [`ApiClient`].

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use thermodash_core::auth::AuthError;
use thermodash_core::models::{Brand, Thermostat, ThermostatMode, UserProfile};
use thermodash_core::{ApiClient, ApiError, Config, SessionManager, Startup};

/// Credentials can come from the environment (or `.env`) instead of a prompt
const EMAIL_ENV: &str = "THERMODASH_EMAIL";
const PASSWORD_ENV: &str = "THERMODASH_PASSWORD";

pub const USAGE: &str = "\
Usage: thermodash <command> [args]

Commands:
  login [--remember]               Sign in (--remember keeps you signed in)
  register                         Create an account
  logout                           Sign out and forget stored tokens
  status                           Show who is signed in
  properties                       List properties
  thermostats <property-id>        List the thermostats of a property
  thermostat <brand> <id>          Show one thermostat
  set-target <brand> <id> <temp> [mode]
                                   Set the target temperature
  schedules <brand> <id>           List a thermostat's schedules
  calendars <property-id>          List calendars and upcoming events

Brands: nest, cielo, pioneer, generic";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { remember: bool },
    Register,
    Logout,
    Status,
    Properties,
    Thermostats { property_id: String },
    Thermostat { brand: Brand, id: String },
    SetTarget {
        brand: Brand,
        id: String,
        temperature: f64,
        mode: Option<ThermostatMode>,
    },
    Schedules { brand: Brand, id: String },
    Calendars { property_id: String },
    Help,
}

impl Command {
    /// Parse the arguments following the program name.
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Help);
        };
        let arg = |index: usize, what: &str| -> Result<String> {
            rest.get(index)
                .cloned()
                .ok_or_else(|| anyhow!("Missing {} for `{}`\n\n{}", what, name, USAGE))
        };

        let command = match name.as_str() {
            "login" => Command::Login {
                remember: rest.iter().any(|a| a == "--remember" || a == "-r"),
            },
            "register" => Command::Register,
            "logout" => Command::Logout,
            "status" => Command::Status,
            "properties" => Command::Properties,
            "thermostats" => Command::Thermostats {
                property_id: arg(0, "property id")?,
            },
            "thermostat" => Command::Thermostat {
                brand: Brand::parse(&arg(0, "brand")?),
                id: arg(1, "thermostat id")?,
            },
            "set-target" => {
                let raw = arg(2, "temperature")?;
                let temperature: f64 = raw
                    .parse()
                    .with_context(|| format!("Invalid temperature: {}", raw))?;
                if !temperature.is_finite() {
                    bail!("Invalid temperature: {}", raw);
                }
                Command::SetTarget {
                    brand: Brand::parse(&arg(0, "brand")?),
                    id: arg(1, "thermostat id")?,
                    temperature,
                    mode: rest.get(3).map(|m| ThermostatMode::from(m.clone())),
                }
            }
            "schedules" => Command::Schedules {
                brand: Brand::parse(&arg(0, "brand")?),
                id: arg(1, "thermostat id")?,
            },
            "calendars" => Command::Calendars {
                property_id: arg(0, "property id")?,
            },
            "help" | "--help" | "-h" => Command::Help,
            other => bail!("Unknown command: {}\n\n{}", other, USAGE),
        };
        Ok(command)
    }

    /// Whether the command needs the stored session restored first.
    /// Signing in, registering and signing out replace or ignore it.
    fn restores_session(&self) -> bool {
        !matches!(
            self,
            Command::Login { .. } | Command::Register | Command::Logout | Command::Help
        )
    }
}

pub async fn run(command: Command, mut config: Config) -> Result<()> {
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let session = config.build_session()?;
    let revalidation = if command.restores_session() {
        restore(&session).await
    } else {
        None
    };

    match command {
        Command::Login { remember } => login(&session, &mut config, remember).await,
        Command::Register => register(&session).await,
        Command::Logout => {
            session.logout();
            println!("Signed out.");
            Ok(())
        }
        Command::Status => status(&session, revalidation).await,
        command => {
            let client = ApiClient::new(session.clone());
            let result = run_api_command(&client, command).await;
            finish_revalidation(revalidation).await;
            result.map_err(|e| explain(&session, e))
        }
    }
}

/// Restore the stored session. A provisional session is confirmed in the
/// background while the command runs.
async fn restore(session: &Arc<SessionManager>) -> Option<JoinHandle<Result<UserProfile, AuthError>>> {
    match session.initialize().await {
        Ok(Startup::Provisional(user)) => {
            debug!(user_id = %user.id, "Provisional session, revalidating");
            Some(session.spawn_revalidation())
        }
        Ok(Startup::Confirmed(_)) | Ok(Startup::Anonymous) => None,
        Err(AuthError::SessionExpired) => {
            eprintln!("Your session has expired, please sign in again.");
            None
        }
        Err(e) => {
            warn!(error = %e, "Could not restore session");
            None
        }
    }
}

async fn finish_revalidation(handle: Option<JoinHandle<Result<UserProfile, AuthError>>>) {
    let Some(handle) = handle else { return };
    match handle.await {
        Ok(Ok(_)) => {}
        Ok(Err(AuthError::SessionExpired)) => {
            eprintln!("Your session has expired, please sign in again.");
        }
        Ok(Err(e)) => debug!(error = %e, "Revalidation did not complete"),
        Err(e) => warn!(error = %e, "Revalidation task failed"),
    }
}

fn explain(session: &SessionManager, error: ApiError) -> anyhow::Error {
    match error {
        ApiError::Unauthorized if !session.is_authenticated() => match session.snapshot().last_error {
            Some(AuthError::SessionExpired) => {
                anyhow!("Your session has expired. Run `thermodash login` to sign in again.")
            }
            _ => anyhow!("Not signed in. Run `thermodash login` first."),
        },
        other => anyhow::Error::new(other),
    }
}

async fn login(session: &SessionManager, config: &mut Config, remember: bool) -> Result<()> {
    let email = match std::env::var(EMAIL_ENV) {
        Ok(email) if !email.trim().is_empty() => email.trim().to_string(),
        _ => prompt_email(config.last_email.as_deref())?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };
    if email.is_empty() || password.is_empty() {
        bail!("Email and password required");
    }

    let user = session.login(&email, &password, remember).await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Signed in as {} <{}>", user.display_name(), user.email);
    if !remember {
        println!("(Session will not be kept after this command; use --remember to stay signed in.)");
    }
    Ok(())
}

async fn register(session: &SessionManager) -> Result<()> {
    let email = prompt("Email: ")?;
    let first_name = prompt("First name: ")?;
    let last_name = prompt("Last name: ")?;
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    session.register(&email, &password, &first_name, &last_name).await?;
    println!("Account created. Run `thermodash login` to sign in.");
    Ok(())
}

async fn status(
    session: &SessionManager,
    revalidation: Option<JoinHandle<Result<UserProfile, AuthError>>>,
) -> Result<()> {
    let provisional = revalidation.is_some();
    finish_revalidation(revalidation).await;

    let snapshot = session.snapshot();
    match snapshot.user {
        Some(ref user) if snapshot.is_authenticated() => {
            println!("Signed in as {} <{}>", user.display_name(), user.email);
            if provisional && snapshot.last_error.is_some() {
                println!("(Could not reach the server; showing the cached profile.)");
            }
        }
        _ => println!("Not signed in."),
    }
    Ok(())
}

async fn run_api_command(client: &ApiClient, command: Command) -> Result<(), ApiError> {
    match command {
        Command::Properties => {
            let properties = client.fetch_properties().await?;
            if properties.is_empty() {
                println!("No properties.");
                return Ok(());
            }
            let counts = join_all(properties.iter().map(|p| client.fetch_thermostats(&p.id))).await;
            for (property, thermostats) in properties.iter().zip(counts) {
                let count = match thermostats {
                    Ok(list) => list.len().to_string(),
                    Err(e) => {
                        warn!(property_id = %property.id, error = %e, "Failed to fetch thermostats");
                        "?".to_string()
                    }
                };
                println!(
                    "{:<8} {:<30} {:<40} {} thermostat(s)",
                    property.id,
                    property.name,
                    property.location_display(),
                    count
                );
            }
        }
        Command::Thermostats { property_id } => {
            let thermostats = client.fetch_thermostats(&property_id).await?;
            if thermostats.is_empty() {
                println!("No thermostats.");
            }
            for thermostat in &thermostats {
                print_thermostat_line(thermostat);
            }
        }
        Command::Thermostat { brand, id } => {
            let thermostat = client.fetch_thermostat(brand, &id).await?;
            print_thermostat(&thermostat);
        }
        Command::SetTarget {
            brand,
            id,
            temperature,
            mode,
        } => {
            let thermostat = client.set_target_temperature(brand, &id, temperature, mode).await?;
            println!("Target set.");
            print_thermostat(&thermostat);
        }
        Command::Schedules { brand, id } => {
            let schedules = client.fetch_schedules(brand, &id).await?;
            if schedules.is_empty() {
                println!("No schedules.");
            }
            for schedule in &schedules {
                let state = if schedule.enabled { "" } else { " (disabled)" };
                println!("{} [{}]{}", schedule.name, schedule.id, state);
                for entry in schedule.sorted_entries() {
                    println!(
                        "  {} {} -> {:.1}°",
                        entry.day_name(),
                        entry.start_time,
                        entry.target_temperature
                    );
                }
            }
        }
        Command::Calendars { property_id } => {
            let calendars = client.fetch_calendars(&property_id).await?;
            if calendars.is_empty() {
                println!("No calendars.");
                return Ok(());
            }
            let events = join_all(calendars.iter().map(|c| client.fetch_calendar_events(&c.id))).await;
            let now = chrono::Utc::now();
            for (calendar, events) in calendars.iter().zip(events) {
                println!("{} [{}]", calendar.name, calendar.id);
                match events {
                    Ok(events) => {
                        for event in events.iter().filter(|e| e.is_current_or_upcoming(now)) {
                            println!("  {}  {}", event.start.format("%Y-%m-%d %H:%M"), event.title);
                        }
                    }
                    Err(e) => println!("  (events unavailable: {})", e),
                }
            }
        }
        Command::Login { .. } | Command::Register | Command::Logout | Command::Status | Command::Help => {}
    }
    Ok(())
}

fn print_thermostat_line(thermostat: &Thermostat) {
    println!(
        "{:<8} {:<8} {:<24} now {:>7}  target {:>7}",
        thermostat.id,
        thermostat.brand,
        thermostat.name,
        thermostat.current_display(),
        thermostat.target_display()
    );
}

fn print_thermostat(thermostat: &Thermostat) {
    println!("{} ({} {})", thermostat.name, thermostat.brand, thermostat.id);
    println!("  Current:  {}", thermostat.current_display());
    println!("  Target:   {}", thermostat.target_display());
    if let Some(ref mode) = thermostat.mode {
        println!("  Mode:     {}", String::from(mode.clone()));
    }
    if let Some(humidity) = thermostat.humidity {
        println!("  Humidity: {:.0}%", humidity);
    }
    if thermostat.online == Some(false) {
        println!("  Offline");
    }
}

fn prompt_email(last_email: Option<&str>) -> Result<String> {
    match last_email {
        Some(last) => {
            let input = prompt(&format!("Email [{}]: ", last))?;
            Ok(if input.is_empty() { last.to_string() } else { input })
        }
        None => prompt("Email: "),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_no_args_is_help() {
        assert_eq!(Command::parse(&[]).unwrap(), Command::Help);
    }

    #[test]
    fn test_parse_login_flags() {
        assert_eq!(
            Command::parse(&args(&["login"])).unwrap(),
            Command::Login { remember: false }
        );
        assert_eq!(
            Command::parse(&args(&["login", "--remember"])).unwrap(),
            Command::Login { remember: true }
        );
    }

    #[test]
    fn test_parse_brand_commands() {
        assert_eq!(
            Command::parse(&args(&["thermostat", "Nest", "7"])).unwrap(),
            Command::Thermostat {
                brand: Brand::Nest,
                id: "7".to_string()
            }
        );
        assert_eq!(
            Command::parse(&args(&["schedules", "honeywell", "9"])).unwrap(),
            Command::Schedules {
                brand: Brand::Generic,
                id: "9".to_string()
            }
        );
    }

    #[test]
    fn test_parse_set_target() {
        assert_eq!(
            Command::parse(&args(&["set-target", "cielo", "3", "21.5", "cool"])).unwrap(),
            Command::SetTarget {
                brand: Brand::Cielo,
                id: "3".to_string(),
                temperature: 21.5,
                mode: Some(ThermostatMode::Cool),
            }
        );
        assert!(Command::parse(&args(&["set-target", "cielo", "3", "warm"])).is_err());
        assert!(Command::parse(&args(&["set-target", "cielo", "3", "NaN"])).is_err());
        assert!(Command::parse(&args(&["set-target", "cielo"])).is_err());
    }

    #[test]
    fn test_only_data_commands_restore_session() {
        for name in ["login", "register", "logout", "help"] {
            assert!(!Command::parse(&args(&[name])).unwrap().restores_session(), "{}", name);
        }
        assert!(Command::parse(&args(&["status"])).unwrap().restores_session());
        assert!(Command::parse(&args(&["properties"])).unwrap().restores_session());
        assert!(Command::parse(&args(&["calendars", "1"])).unwrap().restores_session());
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = Command::parse(&args(&["reboot"])).unwrap_err();
        assert!(err.to_string().contains("Unknown command"));
    }
}
