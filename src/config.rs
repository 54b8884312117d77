#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum CargoEnv {
    Development,
    Production,
}

impl CargoEnv {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(clap::Parser, Debug, Clone)]
pub struct AppConfig {
    // production or development, production hides error details from clients
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "3001")]
    pub port: u16,

    // player pages are small html documents so they get a short leash
    #[clap(long, env, default_value = "10")]
    pub page_timeout_secs: u64,

    // how long the final media fetch may take to return headers, the body itself is unbounded
    #[clap(long, env, default_value = "30")]
    pub media_timeout_secs: u64,

    #[clap(long, env, default_value = "15")]
    pub image_timeout_secs: u64,

    #[clap(long, env, default_value = "10")]
    pub connect_timeout_secs: u64,

    #[clap(long, env, default_value = "5")]
    pub max_redirects: usize,

    // extra player hosts to scrape on top of the built in ones, comma seperated like
    // player.example.com,embed.other.net
    #[clap(long, env, value_delimiter = ',')]
    pub intermediate_hosts: Vec<String>,

    // the site the /img and /p routes pretend to be loaded from
    #[clap(long, env, default_value = "https://otakudesu.best")]
    pub catalog_origin: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 3001,
            page_timeout_secs: 10,
            media_timeout_secs: 30,
            image_timeout_secs: 15,
            connect_timeout_secs: 10,
            max_redirects: 5,
            intermediate_hosts: Vec::new(),
            catalog_origin: "https://otakudesu.best".to_string(),
            sentry_dsn: None,
        }
    }
}
