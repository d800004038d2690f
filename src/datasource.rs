//! The datasource contract: `get(index, count)` in one of several calling conventions.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{DatasourceError, FetchError};
use crate::settings::DevSettings;

pub type FetchResult<T> = Result<Vec<T>, FetchError>;

/// Completion handle passed to [`Getter::Callback`] getters.
///
/// Resolve it exactly once with [`Done::success`] or [`Done::fail`]. Dropping it unresolved
/// fails the fetch with [`FetchError::Abandoned`]. Resolving a handle whose fetch was cancelled
/// (by a reload or dispose) is a silent no-op.
#[derive(Debug)]
pub struct Done<T> {
    tx: oneshot::Sender<FetchResult<T>>,
}

impl<T> Done<T> {
    pub fn success(self, items: Vec<T>) {
        self.resolve(Ok(items));
    }

    pub fn fail(self, error: FetchError) {
        self.resolve(Err(error));
    }

    pub fn resolve(self, result: FetchResult<T>) {
        if self.tx.send(result).is_err() {
            vtrace!("Done::resolve: fetch was cancelled, result discarded");
        }
    }

    /// Whether the fetch this handle belongs to was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

type IndexFn<T> = dyn Fn(i64) -> Vec<T> + Send + Sync;
type DirectFn<T> = dyn Fn(i64, usize) -> Vec<T> + Send + Sync;
type CallbackFn<T> = dyn Fn(i64, usize, Done<T>) + Send + Sync;
type FutureFn<T> = dyn Fn(i64, usize) -> BoxFuture<'static, FetchResult<T>> + Send + Sync;
type StreamFn<T> = dyn Fn(i64, usize) -> BoxStream<'static, FetchResult<T>> + Send + Sync;

/// The calling conventions a datasource `get` may use.
pub enum Getter<T> {
    /// `get(index)`: only receives the start index. Always rejected at attach time; the engine
    /// fetches ranges.
    Index(Arc<IndexFn<T>>),
    /// `get(index, count) -> items`.
    Direct(Arc<DirectFn<T>>),
    /// `get(index, count, done)`: resolves `done` later.
    Callback(Arc<CallbackFn<T>>),
    /// `get(index, count) -> Future<items>`.
    Future(Arc<FutureFn<T>>),
    /// `get(index, count) -> Stream<items>`; the first emission is the result.
    Stream(Arc<StreamFn<T>>),
}

impl<T> Clone for Getter<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Index(f) => Self::Index(Arc::clone(f)),
            Self::Direct(f) => Self::Direct(Arc::clone(f)),
            Self::Callback(f) => Self::Callback(Arc::clone(f)),
            Self::Future(f) => Self::Future(Arc::clone(f)),
            Self::Stream(f) => Self::Stream(Arc::clone(f)),
        }
    }
}

impl<T> core::fmt::Debug for Getter<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Index(_) => "Index",
            Self::Direct(_) => "Direct",
            Self::Callback(_) => "Callback",
            Self::Future(_) => "Future",
            Self::Stream(_) => "Stream",
        };
        write!(f, "Getter::{name}(..)")
    }
}

impl<T> Getter<T> {
    /// Declared parameter count.
    pub fn params(&self) -> usize {
        match self {
            Self::Index(_) => 1,
            Self::Direct(_) | Self::Future(_) | Self::Stream(_) => 2,
            Self::Callback(_) => 3,
        }
    }
}

/// A getter that fetches ranges: every [`Getter`] form except [`Getter::Index`].
pub(crate) enum Fetcher<T> {
    Direct(Arc<DirectFn<T>>),
    Callback(Arc<CallbackFn<T>>),
    Future(Arc<FutureFn<T>>),
    Stream(Arc<StreamFn<T>>),
}

impl<T> TryFrom<&Getter<T>> for Fetcher<T> {
    type Error = DatasourceError;

    fn try_from(get: &Getter<T>) -> Result<Self, DatasourceError> {
        match get {
            Getter::Index(_) => Err(DatasourceError::GetArity {
                params: get.params(),
            }),
            Getter::Direct(f) => Ok(Self::Direct(Arc::clone(f))),
            Getter::Callback(f) => Ok(Self::Callback(Arc::clone(f))),
            Getter::Future(f) => Ok(Self::Future(Arc::clone(f))),
            Getter::Stream(f) => Ok(Self::Stream(Arc::clone(f))),
        }
    }
}

impl<T: Send + 'static> Fetcher<T> {
    /// Issues a fetch. Every calling convention is funnelled into one future; dropping it
    /// cancels the fetch.
    pub(crate) fn fetch(&self, index: i64, count: usize) -> BoxFuture<'static, FetchResult<T>> {
        match self {
            Self::Direct(get) => future::ready(Ok(get(index, count))).boxed(),
            Self::Callback(get) => {
                let (tx, rx) = oneshot::channel();
                get(index, count, Done { tx });
                rx.map(|received| received.unwrap_or(Err(FetchError::Abandoned)))
                    .boxed()
            }
            Self::Future(get) => get(index, count),
            Self::Stream(get) => get(index, count)
                .into_future()
                .map(|(first, _rest)| first.unwrap_or_else(|| Ok(Vec::new())))
                .boxed(),
        }
    }
}

/// A datasource as supplied by the host: an optional `get` plus optional raw settings.
pub struct Datasource<T> {
    pub get: Option<Getter<T>>,
    /// Raw settings; normalized with [`crate::Settings::normalize`] at attach time.
    pub settings: Option<Value>,
    pub dev_settings: Option<DevSettings>,
}

impl<T> Default for Datasource<T> {
    fn default() -> Self {
        Self {
            get: None,
            settings: None,
            dev_settings: None,
        }
    }
}

impl<T> Clone for Datasource<T> {
    fn clone(&self) -> Self {
        Self {
            get: self.get.clone(),
            settings: self.settings.clone(),
            dev_settings: self.dev_settings,
        }
    }
}

impl<T> core::fmt::Debug for Datasource<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Datasource")
            .field("get", &self.get)
            .field("settings", &self.settings)
            .field("dev_settings", &self.dev_settings)
            .finish()
    }
}

impl<T> Datasource<T> {
    pub fn new(get: Getter<T>) -> Self {
        Self {
            get: Some(get),
            ..Self::default()
        }
    }

    pub fn direct(get: impl Fn(i64, usize) -> Vec<T> + Send + Sync + 'static) -> Self {
        Self::new(Getter::Direct(Arc::new(get)))
    }

    pub fn callback(get: impl Fn(i64, usize, Done<T>) + Send + Sync + 'static) -> Self {
        Self::new(Getter::Callback(Arc::new(get)))
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_dev_settings(mut self, dev_settings: DevSettings) -> Self {
        self.dev_settings = Some(dev_settings);
        self
    }

    /// Checks the contract and returns the usable getter.
    pub fn validate(&self) -> Result<&Getter<T>, DatasourceError> {
        let get = self.get.as_ref().ok_or(DatasourceError::MissingGet)?;
        let params = get.params();
        if params < 2 {
            return Err(DatasourceError::GetArity { params });
        }
        Ok(get)
    }

    pub(crate) fn fetcher(&self) -> Result<Fetcher<T>, DatasourceError> {
        Fetcher::try_from(self.validate()?)
    }
}

impl<T: Send + 'static> Datasource<T> {
    pub fn future<F>(get: impl Fn(i64, usize) -> F + Send + Sync + 'static) -> Self
    where
        F: core::future::Future<Output = FetchResult<T>> + Send + 'static,
    {
        Self::new(Getter::Future(Arc::new(move |index, count| {
            get(index, count).boxed()
        })))
    }

    pub fn stream<S>(get: impl Fn(i64, usize) -> S + Send + Sync + 'static) -> Self
    where
        S: futures_util::Stream<Item = FetchResult<T>> + Send + 'static,
    {
        Self::new(Getter::Stream(Arc::new(move |index, count| {
            get(index, count).boxed()
        })))
    }
}
