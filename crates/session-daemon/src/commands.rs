//! Session and vault commands.

use crate::{TokenCommand, VaultCommand};
use session_config_and_utils::{AppIdentity, Config, Paths};
use session_service_client::SessionServiceClient;
use session_storage::TokenStore;
use std::time::Duration;

const BIND_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a session command through the service, starting it if needed.
pub async fn token(
    identity: &AppIdentity,
    paths: &Paths,
    command: TokenCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = SessionServiceClient::for_app(identity, paths);
    if !client.connect() {
        println!("Could not reach the session service");
        return Ok(());
    }
    if !client.wait_connected(BIND_TIMEOUT).await {
        println!("Session service did not accept the bind");
        return Ok(());
    }

    match command {
        TokenCommand::Access => print_token(client.get_access_token().await),
        TokenCommand::Refresh => print_token(client.get_refresh_token().await),
        TokenCommand::Id => print_token(client.get_id_token().await),
        TokenCommand::Status => {
            if client.is_authenticated().await {
                println!("authenticated");
            } else {
                println!("not authenticated");
            }
        }
        TokenCommand::Logout => {
            if client.logout().await {
                println!("Logged out");
            } else {
                println!("Logout failed");
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

fn print_token(token: Option<String>) {
    match token {
        Some(token) => println!("{}", token),
        None => println!("(none)"),
    }
}

/// Read the vault directly, without the service.
pub fn vault(
    identity: &AppIdentity,
    paths: &Paths,
    config: &Config,
    command: VaultCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        VaultCommand::Inspect => {
            let store = TokenStore::open(paths, identity, config.vault_encryption)?;
            println!("Vault: {}", paths.vault_file().display());
            println!("{}", store.debug_snapshot());
        }
    }
    Ok(())
}
