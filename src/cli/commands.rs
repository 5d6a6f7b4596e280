//! Handlers of the session commands.

use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use crate::hub::HubSession;
use crate::models::DataUpdate;
use crate::polling::PollOutcome;

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn require_session(hub: &HubSession) -> Result<()> {
    if !hub.restore().await {
        bail!("Not signed in. Run `hublink login` first.");
    }
    Ok(())
}

pub async fn handle_login(hub: &HubSession, username: Option<String>) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    if username.is_empty() {
        bail!("A username is required");
    }
    let password = rpassword::prompt_password("Password: ").wrap_err("Failed to read password")?;

    hub.login(&username, &password)
        .await
        .map_err(|e| eyre!(e.user_message()))?;
    println!("Signed in as {}", username);
    Ok(())
}

pub async fn handle_logout(hub: &HubSession) -> Result<()> {
    hub.restore().await;
    hub.logout().await;
    println!("Signed out");
    Ok(())
}

pub async fn handle_status(hub: &HubSession) -> Result<()> {
    if !hub.restore().await {
        println!("Not signed in");
        return Ok(());
    }

    let session = hub.session();
    let expires = session
        .credentials()
        .and_then(|triple| triple.expires_at())
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    println!("Signed in");
    println!("  identity token expires: {}", expires);
    println!(
        "  session valid:          {}",
        if session.is_valid() { "yes" } else { "no (refresh on next use)" }
    );
    println!("  api endpoint:           {}", hub.config().api_url);
    Ok(())
}

pub async fn handle_poll(hub: &HubSession) -> Result<()> {
    require_session(hub).await?;

    match hub.polling().execute_poll().await {
        PollOutcome::Completed { items, .. } => {
            for item in &items {
                println!("{}", serde_json::to_string(item)?);
            }
            eprintln!("{} item(s)", items.len());
            Ok(())
        }
        PollOutcome::Failed(error) => Err(eyre!(error.user_message())),
        PollOutcome::Skipped => bail!("A poll is already running"),
    }
}

pub async fn handle_watch(hub: &HubSession, device_id: &str) -> Result<()> {
    require_session(hub).await?;

    let print_update = Arc::new(|update: DataUpdate| {
        match serde_json::to_string(&update) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Unprintable update: {}", e),
        }
    });
    let state = hub
        .connect_device(device_id, print_update)
        .await
        .map_err(|e| eyre!("Failed to subscribe to {}: {}", device_id, e))?;
    eprintln!("Watching {} ({}), Ctrl-C to stop", device_id, state);

    let mut states = hub
        .realtime()
        .watch_state(device_id)
        .ok_or_else(|| eyre!("Connection for {} closed", device_id))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    eprintln!("Connection for {} closed", device_id);
                    break;
                }
                let current = *states.borrow();
                eprintln!("{}: {}", device_id, current);
            }
        }
    }

    hub.shutdown().await;
    Ok(())
}
