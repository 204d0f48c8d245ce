//! Shell command lines issued by the installer.
//!
//! With the default configuration these render byte-for-byte to the commands
//! the plugin has always run on the box.

use crate::config::InstallerConfig;

/// Is the daemon package already installed?
pub fn prerequisite_check(config: &InstallerConfig) -> String {
    format!(
        "opkg list-installed 2>/dev/null | grep -qi '^{} '",
        config.service.package
    )
}

/// Package index refresh
pub fn package_refresh() -> String {
    "opkg update".to_string()
}

/// Package install. Retries refresh the index first.
pub fn package_install(config: &InstallerConfig, refresh_first: bool) -> String {
    let install = format!("opkg install {}", config.service.package);
    if refresh_first {
        format!("{} && {}", package_refresh(), install)
    } else {
        install
    }
}

/// Stop through the init script, then kill whatever survived
pub fn service_stop(config: &InstallerConfig) -> String {
    format!(
        "if [ -x {init} ]; then {init} stop >/dev/null 2>&1; fi; killall -9 {proc} >/dev/null 2>&1; ",
        init = config.service.init_script,
        proc = config.service.process_name
    )
}

pub fn service_start(config: &InstallerConfig) -> String {
    format!(
        "if [ -x {init} ]; then {init} start >/dev/null 2>&1; fi;",
        init = config.service.init_script
    )
}

pub fn reload(config: &InstallerConfig) -> String {
    config.bundle.reload_command.clone()
}

pub fn self_update(config: &InstallerConfig) -> String {
    config.maintenance.update_command.clone()
}

pub fn reboot(config: &InstallerConfig) -> String {
    config.maintenance.reboot_command.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_commands_are_exact() {
        let config = InstallerConfig::default();
        assert_eq!(
            prerequisite_check(&config),
            "opkg list-installed 2>/dev/null | grep -qi '^astra-sm '"
        );
        assert_eq!(package_install(&config, false), "opkg install astra-sm");
        assert_eq!(
            package_install(&config, true),
            "opkg update && opkg install astra-sm"
        );
        assert_eq!(
            service_stop(&config),
            "if [ -x /etc/init.d/astra-sm ]; then /etc/init.d/astra-sm stop >/dev/null 2>&1; fi; killall -9 astra-sm >/dev/null 2>&1; "
        );
        assert_eq!(
            service_start(&config),
            "if [ -x /etc/init.d/astra-sm ]; then /etc/init.d/astra-sm start >/dev/null 2>&1; fi;"
        );
        assert_eq!(
            self_update(&config),
            r#"wget -q "--no-check-certificate" https://raw.githubusercontent.com/ciefp/CiefpSettingsT2miAbertis/main/installer.sh -O - | /bin/sh"#
        );
        assert_eq!(reboot(&config), "reboot");
    }

    #[test]
    fn test_commands_follow_config() {
        let mut config = InstallerConfig::default();
        config.service.package = "astra".to_string();
        config.service.init_script = "/etc/init.d/astra".to_string();
        config.service.process_name = "astra".to_string();

        assert!(prerequisite_check(&config).ends_with("'^astra '"));
        assert!(service_stop(&config).contains("killall -9 astra >"));
        assert!(service_start(&config).contains("/etc/init.d/astra start"));
    }
}
