/// Config of a container
/// ## Fields
/// - `name`:
///   Label of the container in spans and diagnostics reports.
/// - `catch_scan_panics`:
///   If `true`, a panic raised while a factory is dry-run for its dependencies is swallowed
///   like an error of the dry run. Otherwise the panic propagates out of `provide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub name: &'static str,
    pub catch_scan_panics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "container",
            catch_scan_panics: true,
        }
    }
}

impl Config {
    #[inline]
    #[must_use]
    pub const fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_catch_scan_panics(mut self, catch_scan_panics: bool) -> Self {
        self.catch_scan_panics = catch_scan_panics;
        self
    }
}
