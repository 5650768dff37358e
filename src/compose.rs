use crate::error::TestpressError;
use crate::session::{PERSISTENT_DESCRIPTOR, SCRIPTS_DESCRIPTOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

const COMPOSE_VERSION: &str = "3.7";

const NGINX_CONF: &str = include_str!("../assets/default.conf");
const PHP_CONFIG: &str = include_str!("../assets/php-config.ini");
const PHPUNIT_CONFIG: &str = include_str!("../assets/phpunit-config.ini");

pub const FRAGMENTS: [(&str, &str); 3] = [
    ("default.conf", NGINX_CONF),
    ("php-config.ini", PHP_CONFIG),
    ("phpunit-config.ini", PHPUNIT_CONFIG),
];

pub const WEB_SERVICE: &str = "wordpress-develop";
pub const PHP_SERVICE: &str = "php";
pub const DATABASE_SERVICE: &str = "mysql";
pub const CLI_SERVICE: &str = "cli";
pub const PHPUNIT_SERVICE: &str = "phpunit";
pub const PHPUNIT_SECONDARY_SERVICE: &str = "phpunit-gutenberg";

pub const DATABASE_NAME: &str = "wordpress_develop";
pub const DATABASE_USER: &str = "root";
pub const DATABASE_PASSWORD: &str = "password";

const PHPUNIT_IMAGE: &str = "garypendergast/wordpress-develop-phpunit";
const SECONDARY_MOUNT_POINT: &str = "/var/www/src/wp-content/plugins/gutenberg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub version: String,
    pub services: BTreeMap<String, Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Service {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub init: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval: String,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VolumeSpec {}

impl ComposeFile {
    fn new() -> Self {
        Self {
            version: COMPOSE_VERSION.to_string(),
            services: BTreeMap::new(),
            volumes: BTreeMap::new(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, TestpressError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptors {
    pub persistent: ComposeFile,
    pub scripts: ComposeFile,
}

/// Lexically normalizes a host path and renders it with the host's
/// separators.
pub fn normalize_host_path(path: &Path) -> String {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized.to_string_lossy().to_string()
}

fn mount(host: &str, container: &str) -> String {
    format!("{host}:{container}")
}

pub fn build_descriptors(primary: &Path, secondary: Option<&Path>, port: u16) -> Descriptors {
    let primary = normalize_host_path(primary);
    let secondary = secondary.map(normalize_host_path);

    let mut persistent = ComposeFile::new();
    persistent.services.insert(
        WEB_SERVICE.to_string(),
        Service {
            image: "nginx:alpine".to_string(),
            ports: vec![format!("{port}:80")],
            volumes: vec![
                "./default.conf:/etc/nginx/conf.d/default.conf".to_string(),
                mount(&primary, "/var/www"),
            ],
            links: vec![PHP_SERVICE.to_string()],
            ..Service::default()
        },
    );
    persistent.services.insert(
        PHP_SERVICE.to_string(),
        Service {
            image: "garypendergast/wordpress-develop-php".to_string(),
            volumes: vec![
                "./php-config.ini:/usr/local/etc/php/conf.d/php-config.ini".to_string(),
                mount(&primary, "/var/www"),
            ],
            links: vec![DATABASE_SERVICE.to_string()],
            ..Service::default()
        },
    );
    persistent.services.insert(
        DATABASE_SERVICE.to_string(),
        Service {
            image: "mysql:5.7".to_string(),
            volumes: vec!["mysql:/var/lib/mysql".to_string()],
            environment: BTreeMap::from([
                (
                    "MYSQL_ROOT_PASSWORD".to_string(),
                    DATABASE_PASSWORD.to_string(),
                ),
                ("MYSQL_DATABASE".to_string(), DATABASE_NAME.to_string()),
            ]),
            healthcheck: Some(HealthCheck {
                test: [
                    "CMD",
                    "mysql",
                    "-e",
                    "SHOW TABLES FROM wordpress_develop",
                    "-uroot",
                    "-ppassword",
                    "-hmysql",
                    "--protocol=tcp",
                ]
                .iter()
                .map(ToString::to_string)
                .collect(),
                interval: "1s".to_string(),
                retries: 100,
            }),
            ..Service::default()
        },
    );
    persistent
        .volumes
        .insert("mysql".to_string(), VolumeSpec::default());

    let mut scripts = ComposeFile::new();
    scripts.services.insert(
        CLI_SERVICE.to_string(),
        Service {
            image: "wordpress:cli".to_string(),
            volumes: vec![mount(&primary, "/var/www")],
            ..Service::default()
        },
    );
    scripts.services.insert(
        PHPUNIT_SERVICE.to_string(),
        Service {
            image: PHPUNIT_IMAGE.to_string(),
            volumes: vec![
                "./phpunit-config.ini:/usr/local/etc/php/conf.d/phpunit-config.ini".to_string(),
                mount(&primary, "/wordpress-develop"),
                "phpunit-uploads:/wordpress-develop/src/wp-content/uploads".to_string(),
            ],
            init: true,
            ..Service::default()
        },
    );
    scripts
        .volumes
        .insert("phpunit-uploads".to_string(), VolumeSpec::default());

    if let Some(secondary) = secondary {
        let secondary_volume = mount(&secondary, SECONDARY_MOUNT_POINT);
        for name in [WEB_SERVICE, PHP_SERVICE] {
            if let Some(service) = persistent.services.get_mut(name) {
                service.volumes.push(secondary_volume.clone());
            }
        }
        if let Some(cli) = scripts.services.get_mut(CLI_SERVICE) {
            cli.volumes.push(secondary_volume);
        }
        scripts.services.insert(
            PHPUNIT_SECONDARY_SERVICE.to_string(),
            Service {
                image: PHPUNIT_IMAGE.to_string(),
                volumes: vec![
                    mount(&primary, "/wordpress-develop"),
                    mount(
                        &secondary,
                        "/wordpress-develop/src/wp-content/plugins/gutenberg",
                    ),
                ],
                ..Service::default()
            },
        );
    }

    Descriptors {
        persistent,
        scripts,
    }
}

pub fn write_descriptors(dir: &Path, descriptors: &Descriptors) -> Result<(), TestpressError> {
    fs::create_dir_all(dir)?;
    fs::write(
        dir.join(PERSISTENT_DESCRIPTOR),
        descriptors.persistent.to_yaml()?,
    )?;
    fs::write(dir.join(SCRIPTS_DESCRIPTOR), descriptors.scripts.to_yaml()?)?;
    for (name, content) in FRAGMENTS {
        fs::write(dir.join(name), content)?;
    }
    Ok(())
}
