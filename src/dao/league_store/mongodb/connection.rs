use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};

use super::error::{MongoDaoError, MongoResult};

const APP_NAME: &str = "league-jobs";
// Fail fast and let the storage supervisor own the retry schedule.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed connection target, kept so the store can rebuild its client on reconnect.
#[derive(Clone)]
pub struct ConnectionTarget {
    options: ClientOptions,
    database_name: String,
}

impl ConnectionTarget {
    /// Parse `uri`, filling in the application name and a short selection timeout
    /// unless the URI sets them.
    pub async fn parse(uri: &str, database_name: &str) -> MongoResult<Self> {
        let mut options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());
        options
            .server_selection_timeout
            .get_or_insert(SERVER_SELECTION_TIMEOUT);

        Ok(Self {
            options,
            database_name: database_name.to_owned(),
        })
    }

    /// Build a fresh client and check that the server answers a ping.
    pub async fn open(&self) -> MongoResult<(Client, Database)> {
        let client = Client::with_options(self.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&self.database_name);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::InitialPing {
                database: self.database_name.clone(),
                source,
            })?;

        Ok((client, database))
    }
}
