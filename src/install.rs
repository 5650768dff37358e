use crate::compose::{DATABASE_NAME, DATABASE_PASSWORD, DATABASE_SERVICE, DATABASE_USER};
use crate::oneshot::run_cli_command;
use crate::process::ProcessRunner;
use crate::session::Session;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const BUILD_PATH: &str = "/var/www/build";
const DEBUG_CONSTANTS: [&str; 3] = ["WP_DEBUG", "SCRIPT_DEBUG", "WP_DEBUG_DISPLAY"];
const SITE_TITLE: &str = "WordPress Develop";
const ADMIN_USER: &str = "admin";
const ADMIN_PASSWORD: &str = "password";
const ADMIN_EMAIL: &str = "test@test.test";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteAction {
    Installed,
    UrlsUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    pub created_config: bool,
    pub site: SiteAction,
}

pub fn site_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

fn relocate_config(root: &Path) {
    let generated = root.join("build").join("wp-config.php");
    if !generated.exists() {
        return;
    }
    debug!("moving wp-config.php out of the build directory");
    if let Err(err) = fs::rename(&generated, root.join("wp-config.php")) {
        warn!(
            "failed to move {} into {}: {err}",
            generated.display(),
            root.display()
        );
    }
}

fn create_config<R: ProcessRunner + ?Sized>(runner: &R, session: &Session, root: &Path) {
    debug!("creating wp-config.php");
    let create = [
        "config".to_string(),
        "create".to_string(),
        format!("--dbname={DATABASE_NAME}"),
        format!("--dbuser={DATABASE_USER}"),
        format!("--dbpass={DATABASE_PASSWORD}"),
        format!("--dbhost={DATABASE_SERVICE}"),
        format!("--path={BUILD_PATH}"),
    ];
    if !run_cli_command(runner, session, &create).success {
        warn!("`wp config create` failed");
    }

    relocate_config(root);

    debug!("adding debug options to wp-config.php");
    for constant in DEBUG_CONSTANTS {
        run_cli_command(
            runner,
            session,
            &["config", "set", constant, "true", "--raw", "--type=constant"],
        );
    }
}

/// Provisions the site served from the checkout at `root` on `port`. The
/// database must already report healthy.
pub fn provision<R: ProcessRunner + ?Sized>(
    runner: &R,
    session: &Session,
    root: &Path,
    port: u16,
) -> InstallReport {
    debug!("checking if a config file exists");
    let config_exists = run_cli_command(runner, session, &["config", "path"]).success;
    if !config_exists {
        create_config(runner, session, root);
    }

    debug!("checking if WordPress is installed");
    let installed = run_cli_command(runner, session, &["core", "is-installed"]).success;
    let url = site_url(port);
    let site = if installed {
        debug!("updating site URL to {url}");
        for option in ["home", "siteurl"] {
            run_cli_command(runner, session, &["option", "update", option, url.as_str()]);
        }
        SiteAction::UrlsUpdated
    } else {
        info!("installing WordPress");
        let install = [
            "core".to_string(),
            "install".to_string(),
            format!("--url=localhost:{port}"),
            format!("--title={SITE_TITLE}"),
            format!("--admin_user={ADMIN_USER}"),
            format!("--admin_password={ADMIN_PASSWORD}"),
            format!("--admin_email={ADMIN_EMAIL}"),
            "--skip-email".to_string(),
        ];
        if !run_cli_command(runner, session, &install).success {
            warn!("`wp core install` failed");
        }
        SiteAction::Installed
    };

    InstallReport {
        created_config: !config_exists,
        site,
    }
}
