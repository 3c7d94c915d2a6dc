//! Hibernate request dispatch.
//!
//! The daemon only asks the platform to hibernate; a successful call means
//! the request was accepted, not that suspension has completed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;
use zbus::Connection;

const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";

/// Trait for the hibernate collaborator.
#[async_trait]
pub trait HibernateAction: Send + Sync {
    /// Request hibernation.
    async fn hibernate(&self) -> Result<()>;
}

/// Hibernates via logind's Manager.Hibernate call.
pub struct LogindPower {
    dry_run: bool,
}

impl LogindPower {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

#[async_trait]
impl HibernateAction for LogindPower {
    async fn hibernate(&self) -> Result<()> {
        if self.dry_run {
            info!("[DRY RUN] Would request hibernation via logind");
            return Ok(());
        }

        let conn = Connection::system()
            .await
            .context("Failed to connect to system DBus")?;

        let proxy = zbus::Proxy::new(&conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE)
            .await
            .context("Failed to create Manager proxy")?;

        // false: don't prompt for polkit interactive authorization.
        proxy
            .call::<_, _, ()>("Hibernate", &(false,))
            .await
            .context("Hibernate call failed")?;

        info!("Hibernation request accepted");
        Ok(())
    }
}
