mod connection;
mod error;
mod models;
mod store;

pub use error::MongoDaoError;
pub use store::MongoLeagueStore;
