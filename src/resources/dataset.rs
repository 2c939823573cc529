use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::Context as _;

use crate::data_structures::city_object::CityModel;

/// The CityGML parsing collaborator.
///
/// `gml_name` is the GML file name including its extension, e.g. `53392642_bldg_6697_op.gml`.
pub trait DatasetSource: Send + Sync {
    fn load_city_model(&self, dataset_name: &str, gml_name: &str) -> anyhow::Result<Arc<CityModel>>;
}

/// Memoizes parsed city models per `(dataset, gml)` for the lifetime of the decorator.
pub struct CachedDatasetSource<D> {
    inner: D,
    cache: Mutex<HashMap<(String, String), Arc<CityModel>>>,
}

impl<D: DatasetSource> CachedDatasetSource<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl<D: DatasetSource> DatasetSource for CachedDatasetSource<D> {
    fn load_city_model(
        &self,
        dataset_name: &str,
        gml_name: &str,
    ) -> anyhow::Result<Arc<CityModel>> {
        let key = (dataset_name.to_string(), gml_name.to_string());
        if let Some(model) = self
            .cache
            .lock()
            .map_err(|_| anyhow::anyhow!("city model cache poisoned"))?
            .get(&key)
        {
            return Ok(model.clone());
        }

        let model = self
            .inner
            .load_city_model(dataset_name, gml_name)
            .with_context(|| format!("failed to parse {} in {}", gml_name, dataset_name))?;
        self.cache
            .lock()
            .map_err(|_| anyhow::anyhow!("city model cache poisoned"))?
            .insert(key, model.clone());
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingSource(AtomicUsize);

    impl DatasetSource for CountingSource {
        fn load_city_model(&self, _: &str, gml_name: &str) -> anyhow::Result<Arc<CityModel>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CityModel::new(gml_name)))
        }
    }

    #[test]
    fn parses_each_file_once() {
        let cached = CachedDatasetSource::new(CountingSource::default());
        for _ in 0..3 {
            cached.load_city_model("tokyo", "a_bldg_6697.gml").unwrap();
        }
        cached.load_city_model("tokyo", "b_tran_6697.gml").unwrap();
        assert_eq!(cached.inner.0.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_len(), 2);
    }
}
