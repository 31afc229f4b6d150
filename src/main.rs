use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use serde::Serialize;
use std::sync::Arc;

use console_session::auth::{token_preview, SqliteStorage};
use console_session::config::{Command, Config, MemberAction, OrgAction};
use console_session::models::{remove_by_id, Member, Organization};
use console_session::navigator::LoginRedirect;
use console_session::{SessionClient, SessionError};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, command) = Config::load()?;
    config.validate()?;

    // Logs go to stderr so command output stays machine-readable
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!(
        api_url = %config.api_url,
        session_db = %config.session_db.display(),
        "Configuration loaded"
    );

    let storage = Arc::new(SqliteStorage::open(&config.session_db)?);
    let navigator = Arc::new(LoginRedirect::new());
    let client = SessionClient::new(config.client_settings(), storage, navigator.clone())?;

    let result = run(&client, command).await;

    if let Err(ref e) = result {
        let session_over = e
            .downcast_ref::<SessionError>()
            .map(SessionError::requires_login)
            .unwrap_or(false);
        if session_over || navigator.session_ended() {
            eprintln!("Your session has ended. Run `consolectl login` to sign in again.");
        }
    }

    result
}

async fn run(client: &SessionClient, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let email = match email {
                Some(email) => email,
                None => Input::new()
                    .with_prompt("Email")
                    .interact_text()
                    .context("Failed to read email")?,
            };
            let password = match password {
                Some(password) => password,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };

            client.login(&email, &password).await?;
            println!("Logged in as {}", email);
        }

        Command::Logout => {
            client.logout()?;
            println!("Logged out");
        }

        Command::Status => {
            let credentials = client.credentials()?;
            let org = client.active_organization()?;
            print_json(&serde_json::json!({
                "authenticated": credentials.is_some(),
                "access_token": credentials.map(|c| token_preview(&c.access_token)),
                "active_organization": org.map(|o| o.id),
            }))?;
        }

        Command::Org { action } => match action {
            OrgAction::Use { id } => {
                client.switch_organization(&id)?;
                println!("Active organization: {}", id);
            }
            OrgAction::Clear => {
                client.clear_organization()?;
                println!("Active organization cleared");
            }
        },

        Command::Orgs => {
            require_login(client)?;
            let orgs: Vec<Organization> = client.get_json("/orgs").await?;
            print_json(&orgs)?;
        }

        Command::Members { action } => {
            require_login(client)?;
            let org_id = client
                .active_organization()?
                .map(|org| org.id)
                .context("No active organization (run `consolectl org use <id>`)")?;
            let members_path = format!("/orgs/{}/members", org_id);

            match action {
                MemberAction::List => {
                    let members: Vec<Member> = client.get_json(&members_path).await?;
                    print_json(&members)?;
                }
                MemberAction::Remove { member_id } => {
                    let mut members: Vec<Member> = client.get_json(&members_path).await?;
                    client
                        .delete(&format!("{}/{}", members_path, member_id))
                        .await?;
                    if remove_by_id(&mut members, &member_id) == 0 {
                        tracing::warn!(member_id = %member_id, "Removed member was not in the listing");
                    }
                    print_json(&members)?;
                }
            }
        }

        Command::Get { path } => {
            require_login(client)?;
            let body: serde_json::Value = client.get_json(&path).await?;
            print_json(&body)?;
        }
    }

    Ok(())
}

fn require_login(client: &SessionClient) -> Result<()> {
    if !client.is_authenticated()? {
        return Err(SessionError::NotAuthenticated.into());
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
