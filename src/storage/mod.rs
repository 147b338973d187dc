pub mod traits;
pub mod memory;
pub mod mongo;
pub mod elasticsearch;

pub use traits::{
    BulkIndexReport, InsertReport, RecordStore, SearchHit, SearchIndex, SearchResponse,
    StorageError,
};
pub use memory::{InMemoryRecordStore, InMemorySearchIndex};
pub use mongo::MongoRecordStore;
pub use elasticsearch::{ElasticsearchConfig, ElasticsearchIndex};
