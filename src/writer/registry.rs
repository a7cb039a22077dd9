//! Explicit registry of writer backends, keyed by storage type

use std::collections::HashMap;
use std::fmt;

use super::csv::{CsvFileWriter, STORAGE_TYPE as CSV_STORAGE_TYPE};
use super::errors::PersistResult;
use super::RecordWriter;
use crate::config::EngineConfig;
use crate::record::CsvRecord;
#[cfg(feature = "sqlite")]
use crate::record::SqlRecord;

/// Creates a writer for the given configuration.
pub type WriterFactory<R> =
    Box<dyn Fn(&EngineConfig) -> PersistResult<Box<dyn RecordWriter<R>>> + Send + Sync>;

/// Maps storage type names to writer factories.
pub struct WriterRegistry<R> {
    factories: HashMap<String, WriterFactory<R>>,
}

impl<R> Default for WriterRegistry<R> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<R: 'static> fmt::Debug for WriterRegistry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterRegistry")
            .field("storage_types", &self.names())
            .finish()
    }
}

impl<R: 'static> WriterRegistry<R> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the same name.
    pub fn register<F>(&mut self, storage_type: impl Into<String>, factory: F)
    where
        F: Fn(&EngineConfig) -> PersistResult<Box<dyn RecordWriter<R>>> + Send + Sync + 'static,
    {
        let storage_type = storage_type.into().to_lowercase();
        if self.factories.insert(storage_type.clone(), Box::new(factory)).is_some() {
            tracing::debug!(storage_type = %storage_type, "replaced writer factory");
        }
    }

    /// Whether a factory is registered for the name (case-insensitive).
    pub fn contains(&self, storage_type: &str) -> bool {
        self.factories.contains_key(&storage_type.to_lowercase())
    }

    /// Creates a writer, or `None` if the name is unknown.
    pub fn create(
        &self,
        storage_type: &str,
        config: &EngineConfig,
    ) -> Option<PersistResult<Box<dyn RecordWriter<R>>>> {
        self.factories
            .get(&storage_type.to_lowercase())
            .map(|factory| factory(config))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<R: CsvRecord> WriterRegistry<R> {
    /// Registry with the built-in backends (`csv`).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CSV_STORAGE_TYPE, |config: &EngineConfig| {
            let writer: Box<dyn RecordWriter<R>> = Box::new(CsvFileWriter::<R>::from_config(config));
            Ok(writer)
        });
        registry
    }
}

#[cfg(feature = "sqlite")]
impl<R: SqlRecord> WriterRegistry<R> {
    /// Adds the `sqlite` backend.
    pub fn with_sqlite(mut self) -> Self {
        self.register(super::sqlite::STORAGE_TYPE, |config: &EngineConfig| {
            let writer: Box<dyn RecordWriter<R>> = Box::new(super::sqlite::SqliteWriter::<R>::from_config(config));
            Ok(writer)
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchCursor;
    use crate::record::SaveOptions;

    struct NullWriter;

    impl RecordWriter<u32> for NullWriter {
        fn storage_type(&self) -> &str {
            "null"
        }

        fn setup(&mut self) -> PersistResult<()> {
            Ok(())
        }

        fn write_batch(&mut self, cursor: &mut BatchCursor<u32>, _options: &SaveOptions) -> PersistResult<()> {
            while cursor.has_unsaved() {
                cursor.advance();
            }
            Ok(())
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry: WriterRegistry<u32> = WriterRegistry::new();
        registry.register("Null", |_config: &EngineConfig| {
            let writer: Box<dyn RecordWriter<u32>> = Box::new(NullWriter);
            Ok(writer)
        });

        assert!(registry.contains("null"));
        assert_eq!(registry.names(), vec!["null"]);

        let writer = registry.create("NULL", &EngineConfig::default()).unwrap().unwrap();
        assert_eq!(writer.storage_type(), "null");
    }

    #[test]
    fn test_debug_lists_storage_types() {
        let registry: WriterRegistry<crate::trade::TradeRecord> = WriterRegistry::with_defaults();
        let debug = format!("{:?}", registry);
        assert!(debug.contains("WriterRegistry"));
        assert!(debug.contains("\"csv\""));
    }

    #[test]
    fn test_unknown_storage_type() {
        let registry: WriterRegistry<u32> = WriterRegistry::new();
        assert!(registry.create("mysql", &EngineConfig::default()).is_none());
    }

    #[test]
    fn test_defaults_provide_csv() {
        let registry: WriterRegistry<crate::trade::TradeRecord> = WriterRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["csv"]);

        let writer = registry.create("csv", &EngineConfig::default()).unwrap().unwrap();
        assert_eq!(writer.storage_type(), "csv");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_is_added_on_request() {
        let registry: WriterRegistry<crate::trade::TradeRecord> = WriterRegistry::with_defaults().with_sqlite();
        assert_eq!(registry.names(), vec!["csv", "sqlite"]);

        let writer = registry.create("SQLite", &EngineConfig::default()).unwrap().unwrap();
        assert_eq!(writer.storage_type(), "sqlite");
    }
}
