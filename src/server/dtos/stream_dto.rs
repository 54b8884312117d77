use serde::Deserialize;

/// query string shared by every media route, `token` is only meaningful on `/stream`
#[derive(Debug, Default, Deserialize)]
pub struct MediaQuery {
    pub url: Option<String>,
    pub token: Option<String>,
}
