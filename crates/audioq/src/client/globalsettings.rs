use crate::client::output::outputs::Output;
use crate::config::Config;

pub struct GlobalSettings {
    config: Config,
    printer: Box<dyn Output>,
}

impl GlobalSettings {
    pub fn new(config: Config, printer: Box<dyn Output>) -> Self {
        GlobalSettings { config, printer }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn printer(&self) -> &dyn Output {
        self.printer.as_ref()
    }
}
