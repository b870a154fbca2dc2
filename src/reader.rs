//! Retrieval front end
//!
//! A [`Reader`] is bound to one (model, experiment, source). It resolves the
//! fix rule once at construction, then serves normalized data either as a
//! single dataset or as a lazy sequence of time chunks.

use crate::catalog::{Catalog, CatalogEntry};
use crate::config::ReaderConfig;
use crate::dataset::Dataset;
use crate::decumulate::Decumulator;
use crate::errors::Result;
use crate::fixer::{DataModel, EffectiveFixRule, FixConfig, FixRuleResolver, VariableNormalizer};
use crate::statistics::resample::{resample, ResampleOptions};
use crate::streaming::{generator, StreamSpec, StreamingCursor};
use crate::units::UnitSystem;
use chrono::NaiveDateTime;
use log::{debug, info};
use std::path::PathBuf;

/// Retrieval parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
    pub model: String,
    pub exp: String,
    pub source: String,
    /// Apply fix rules at all
    pub fix: bool,
    /// Fixer family to use instead of the one declared by the catalog
    pub fixer_name: Option<String>,
    /// Apply the computed unit conversions to the values
    pub apply_unit_fix: bool,
    /// Return chunk streams instead of single datasets
    pub streaming: bool,
    pub stream: StreamSpec,
    pub startdate: Option<NaiveDateTime>,
    pub enddate: Option<NaiveDateTime>,
    /// Directory holding `{src}2{dst}.json` data model files
    pub data_model_dir: Option<PathBuf>,
    pub dst_data_model: Option<String>,
}

impl ReaderOptions {
    pub fn new(model: &str, exp: &str, source: &str) -> Self {
        Self {
            model: model.to_string(),
            exp: exp.to_string(),
            source: source.to_string(),
            fix: true,
            fixer_name: None,
            apply_unit_fix: true,
            streaming: false,
            stream: StreamSpec::default(),
            startdate: None,
            enddate: None,
            data_model_dir: None,
            dst_data_model: None,
        }
    }

    /// Options seeded from a reader configuration file
    pub fn from_config(cfg: &ReaderConfig, model: &str, exp: &str, source: &str) -> Result<Self> {
        Ok(Self {
            apply_unit_fix: cfg.apply_unit_fix,
            stream: cfg.stream_spec()?,
            data_model_dir: cfg.data_models.clone(),
            dst_data_model: cfg.dst_data_model.clone(),
            ..Self::new(model, exp, source)
        })
    }

    #[must_use]
    pub fn streaming(mut self, spec: StreamSpec) -> Self {
        self.streaming = true;
        self.stream = spec;
        self
    }

    #[must_use]
    pub fn between(mut self, startdate: Option<NaiveDateTime>, enddate: Option<NaiveDateTime>) -> Self {
        self.startdate = startdate;
        self.enddate = enddate;
        self
    }
}

/// Lazy sequence of normalized chunks
pub struct ChunkStream<'a> {
    inner: Box<dyn Iterator<Item = Result<Dataset>> + 'a>,
}

impl<'a> ChunkStream<'a> {
    pub fn new(inner: impl Iterator<Item = Result<Dataset>> + 'a) -> Self {
        Self { inner: Box::new(inner) }
    }

    /// Apply `f` to every chunk as it is produced
    pub fn map_chunks<F>(self, mut f: F) -> ChunkStream<'a>
    where
        F: FnMut(Dataset) -> Result<Dataset> + 'a,
    {
        ChunkStream::new(self.inner.map(move |chunk| chunk.and_then(&mut f)))
    }

    /// Drain the stream and concatenate the chunks along time
    pub fn concat(self) -> Result<Dataset> {
        let chunks = self.collect::<Result<Vec<_>>>()?;
        Dataset::concat_time(&chunks)
    }
}

impl Iterator for ChunkStream<'_> {
    type Item = Result<Dataset>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl std::fmt::Debug for ChunkStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChunkStream")
    }
}

/// Result of a retrieval: one dataset, or a stream of chunks
#[derive(Debug)]
pub enum Retrieved<'a> {
    Single(Dataset),
    Stream(ChunkStream<'a>),
}

impl<'a> Retrieved<'a> {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// The whole dataset, draining and concatenating a stream if needed
    pub fn into_dataset(self) -> Result<Dataset> {
        match self {
            Self::Single(ds) => Ok(ds),
            Self::Stream(s) => s.concat(),
        }
    }

    /// Time-average the data. Streams are averaged chunk by chunk as they are
    /// consumed, so each chunk should cover whole output bins.
    pub fn timmean(self, freq: &str, opts: ResampleOptions) -> Result<Retrieved<'a>> {
        match self {
            Self::Single(ds) => Ok(Self::Single(resample(&ds, freq, opts)?)),
            Self::Stream(s) => {
                let freq = freq.to_string();
                // Calendar gaps produce empty chunks; they hold no bins
                let filled = ChunkStream::new(
                    s.filter(|chunk| !matches!(chunk, Ok(ds) if ds.time().is_some_and(<[_]>::is_empty))),
                );
                Ok(Self::Stream(filled.map_chunks(move |chunk| resample(&chunk, &freq, opts))))
            }
        }
    }
}

/// Keep only requested fields, when at least one of them is present
fn select_requested(mut ds: Dataset, requested: Option<&[String]>) -> Dataset {
    if let Some(req) = requested {
        if req.iter().any(|v| ds.contains(v)) {
            ds.fields.retain(|name, _| req.contains(name));
        }
    }
    ds
}

/// Retrieval and normalization for one source
pub struct Reader {
    entry: CatalogEntry,
    options: ReaderOptions,
    normalizer: VariableNormalizer,
    cursor: StreamingCursor,
    stream_cache: Option<(Option<Vec<String>>, Dataset)>,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("options", &self.options)
            .field("normalizer", &self.normalizer)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Reader {
    /// Open the source and resolve its fix rule.
    pub fn new(catalog: &dyn Catalog, fixes: &FixConfig, options: ReaderOptions) -> Result<Self> {
        let entry = catalog.open(&options.model, &options.exp, &options.source)?;
        let rule = if options.fix {
            let fixer_name = options.fixer_name.as_deref().or(entry.fixer_name.as_deref());
            FixRuleResolver::new(fixes).resolve(&options.model, &options.exp, &options.source, fixer_name)?
        } else {
            info!("fixing disabled for {}/{}/{}", options.model, options.exp, options.source);
            None
        };

        let src_model = entry
            .data_model
            .clone()
            .or_else(|| rule.as_ref().and_then(|r| r.data_model.clone()))
            .or_else(|| fixes.defaults.data_model.clone());
        let dst_model = options
            .dst_data_model
            .clone()
            .or_else(|| fixes.defaults.dst_data_model.clone());
        let data_model = match (&options.data_model_dir, src_model, dst_model) {
            (Some(dir), Some(src), Some(dst)) if options.fix && src != dst => DataModel::load(dir, &src, &dst)?,
            _ => None,
        };

        let normalizer = VariableNormalizer::new(rule)
            .with_units(UnitSystem::with_aliases(fixes.defaults.units.clone()))
            .with_data_model(data_model)
            .with_default_coords(fixes.defaults.coords.clone());
        Ok(Self {
            entry,
            options,
            normalizer,
            cursor: StreamingCursor::new(),
            stream_cache: None,
        })
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// The effective fix rule, if one was found
    pub fn fix_rule(&self) -> Option<&EffectiveFixRule> {
        self.normalizer.rule()
    }

    /// Load the raw variables needed for `vars`, restricted to the date window
    fn load_raw(&self, vars: Option<&[String]>) -> Result<Dataset> {
        let wanted = match (vars, self.normalizer.rule()) {
            (Some(v), Some(rule)) if self.options.fix => {
                let mut names = rule.source_variables(v, self.normalizer.grib())?;
                for name in v {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
                Some(names)
            }
            (Some(v), _) => Some(v.to_vec()),
            (None, _) => None,
        };
        debug!("loading variables {wanted:?}");
        let ds = self.entry.handle.load(wanted.as_deref())?;
        if self.options.startdate.is_some() || self.options.enddate.is_some() {
            Ok(ds.sel_time(self.options.startdate, self.options.enddate))
        } else {
            Ok(ds)
        }
    }

    /// Normalize an already retrieved dataset.
    pub fn fixer(&self, ds: Dataset, vars: Option<&[String]>) -> Result<Dataset> {
        if !self.options.fix {
            return Ok(select_requested(ds, vars));
        }
        let fixed = self.normalizer.normalize(ds, vars, self.options.apply_unit_fix)?;
        Ok(select_requested(fixed, vars))
    }

    /// Normalize a sequence of time-ordered chunks, carrying decumulation
    /// memory from one chunk to the next.
    ///
    /// The memory belongs to the returned stream and is separate from the
    /// one used by [`Reader::stream`].
    pub fn fixer_stream<'a, I>(&'a self, chunks: I, vars: Option<&[String]>) -> ChunkStream<'a>
    where
        I: Iterator<Item = Result<Dataset>> + 'a,
    {
        let requested = vars.map(<[String]>::to_vec);
        let fix = self.options.fix;
        let apply = self.options.apply_unit_fix;
        let normalizer = &self.normalizer;
        let mut memory = Decumulator::new();
        ChunkStream::new(chunks.map(move |chunk| {
            let chunk = chunk?;
            let fixed = if fix {
                normalizer.normalize_chunk_with(chunk, requested.as_deref(), apply, &mut memory)?
            } else {
                chunk
            };
            Ok(select_requested(fixed, requested.as_deref()))
        }))
    }

    /// Retrieve `vars` (all variables for `None`).
    ///
    /// In streaming mode the result is a lazy [`ChunkStream`] with its own
    /// position and decumulation memory, independent of [`Reader::stream`].
    pub fn retrieve(&mut self, vars: Option<&[String]>) -> Result<Retrieved<'_>> {
        let raw = self.load_raw(vars)?;
        if !self.options.streaming {
            return Ok(Retrieved::Single(self.fixer(raw, vars)?));
        }
        let chunks = generator(raw, self.options.stream);
        Ok(Retrieved::Stream(self.fixer_stream(chunks, vars)))
    }

    /// Next normalized chunk of `vars`, or `None` once the data is exhausted.
    ///
    /// Successive calls walk the time axis; [`Reader::reset_stream`] starts over.
    pub fn stream(&mut self, vars: Option<&[String]>) -> Result<Option<Dataset>> {
        let key = vars.map(<[String]>::to_vec);
        let cached = self.stream_cache.as_ref().is_some_and(|(k, _)| *k == key);
        if !cached {
            let raw = self.load_raw(vars)?;
            self.stream_cache = Some((key, raw));
        }
        let chunk = match &self.stream_cache {
            Some((_, raw)) => self.cursor.stream(raw, &self.options.stream)?,
            None => None,
        };
        let Some(chunk) = chunk else {
            return Ok(None);
        };
        let fixed = if self.options.fix {
            self.normalizer
                .normalize_chunk(chunk, vars, self.options.apply_unit_fix)?
        } else {
            chunk
        };
        Ok(Some(select_requested(fixed, vars)))
    }

    /// Rewind [`Reader::stream`] and forget decumulation memory
    pub fn reset_stream(&mut self) {
        self.cursor.reset();
        self.normalizer.reset();
        self.stream_cache = None;
    }
}
