use agenthub_auth::{LoginOutcome, MfaMethod};
use agenthub_rust::AgentHub;
use dotenv::dotenv;
use serde_json::Value;
use std::env;
use std::io::{self, BufRead, Write};

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    pretty_env_logger::init();

    let email = env::var("AGENTHUB_EMAIL").expect("AGENTHUB_EMAIL must be set");
    let password = env::var("AGENTHUB_PASSWORD").expect("AGENTHUB_PASSWORD must be set");

    // AGENTHUB_API_URL, AGENTHUB_TOKEN_PATH and AGENTHUB_REQUEST_TIMEOUT_SECS
    let hub = AgentHub::from_env()?;
    hub.init().await;

    let auth = hub.auth();
    println!("Restored session: {:?}", auth.state().phase());

    if !auth.is_authenticated() {
        println!("Signing in as {}", email);

        match auth.login(&email, &password).await? {
            LoginOutcome::Authenticated(response) => {
                println!("Signed in: {}", response.message.unwrap_or_default());
            }
            LoginOutcome::MfaRequired(challenge) => {
                let method = challenge.mfa_method.map_or("unknown", |m| m.as_str());
                println!("Second factor required ({})", method);
                let code = prompt("MFA code")?;
                auth.verify_mfa(&challenge.id, &code).await?;
            }
        }
    }

    let user = auth.current_user().expect("signed in");
    println!("User info: {:?}", user);

    if env::var("AGENTHUB_SETUP_MFA").is_ok() && !user.mfa_enabled {
        let setup = auth.setup_mfa(MfaMethod::Totp).await?;
        println!("Add this to your authenticator: {}", setup.provisioning_uri);
    }

    // any authenticated call goes through the same refresh-and-retry policy
    match hub.get::<Value>("/agents").await {
        Ok(agents) => println!("Agents: {}", agents),
        Err(err) if err.is_session_expired() => println!("Session expired, sign in again"),
        Err(err) => println!("Could not list agents: {}", err),
    }

    if env::var("AGENTHUB_SIGN_OUT").is_ok() {
        println!("\nSigning out");
        auth.sign_out().await;
        println!("User signed out successfully");
    }

    Ok(())
}
