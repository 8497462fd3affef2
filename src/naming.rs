//! Placeholder substitution for resource names and command lines.
//!
//! Templates use `{Key}` placeholders. Substitution is lenient: a placeholder
//! whose key is not supplied stays in the output exactly as written, and so
//! does a `{` that is never closed.

use std::collections::HashMap;

/// Placeholder for the workload (or container) name.
pub const NAME: &str = "Name";
/// Placeholder for a unix timestamp, used for throwaway helper containers.
pub const TIME: &str = "Time";
/// Placeholder for the placement service address.
pub const PLACEMENT_HOST: &str = "PlacementHost";
/// Placeholder for the components directory inside the config volume.
pub const COMPONENTS_PATH: &str = "ComponentsPath";
/// Placeholder for the configuration file inside the config volume.
pub const CONFIG_FILE: &str = "ConfigFile";

/// Immutable set of placeholder values.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: HashMap<&'static str, String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vars holding only `{Name}`.
    pub fn name(value: impl Into<String>) -> Self {
        Self::new().with(NAME, value)
    }

    /// Vars holding only `{Time}`, set to the current unix time in seconds.
    pub fn now() -> Self {
        Self::new().with(TIME, chrono::Utc::now().timestamp().to_string())
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Substitute every known `{Key}` in `template`.
pub fn render(template: &str, vars: &Vars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            // Unterminated placeholder, keep the tail as is.
            out.push_str(&rest[open..]);
            return out;
        };

        let key = &after[..close];
        match vars.get(key) {
            Some(value) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Render each argument of a command line.
pub fn render_all(args: &[String], vars: &Vars) -> Vec<String> {
    args.iter().map(|arg| render(arg, vars)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sidecar_name() {
        let vars = Vars::name("foo");
        assert_eq!(render("kess-app-{Name}-sidecar", &vars), "kess-app-foo-sidecar");
    }

    #[test]
    fn test_unresolved_placeholder_is_left_verbatim() {
        let vars = Vars::name("foo");
        assert_eq!(render("{Missing}", &vars), "{Missing}");
        assert_eq!(render("a-{Missing}-{Name}", &vars), "a-{Missing}-foo");
    }

    #[test]
    fn test_unterminated_brace() {
        let vars = Vars::name("foo");
        assert_eq!(render("kess-{Name", &vars), "kess-{Name");
        assert_eq!(render("{Name}-{", &vars), "foo-{");
    }

    #[test]
    fn test_no_placeholders() {
        assert_eq!(render("redis-server", &Vars::new()), "redis-server");
        assert_eq!(render("", &Vars::new()), "");
    }

    #[test]
    fn test_network_mode_template() {
        let vars = Vars::name("kess-app-svc1");
        assert_eq!(render("container:{Name}", &vars), "container:kess-app-svc1");
    }

    #[test]
    fn test_render_all_keeps_order() {
        let args: Vec<String> = ["./daprd", "--placement-host-address", "{PlacementHost}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vars = Vars::new().with(PLACEMENT_HOST, "kess-system-placement:50005");
        assert_eq!(
            render_all(&args, &vars),
            vec![
                "./daprd",
                "--placement-host-address",
                "kess-system-placement:50005"
            ]
        );
    }

    #[test]
    fn test_time_is_numeric() {
        let vars = Vars::now();
        let rendered = render("kess-tools-{Time}", &vars);
        let suffix = rendered.trim_start_matches("kess-tools-");
        assert!(suffix.parse::<i64>().is_ok());
    }
}
