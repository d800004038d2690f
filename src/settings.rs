use serde_json::Value;

pub const DEFAULT_START_INDEX: i64 = 1;
pub const DEFAULT_BUFFER_SIZE: usize = 5;
pub const DEFAULT_PADDING: f64 = 0.5;

pub const MIN_BUFFER_SIZE: usize = 1;
pub const MIN_PADDING: f64 = 0.0;
pub const MIN_ITEM_SIZE: u32 = 1;

/// An opaque reference to a host-side scrollable node (e.g. a DOM element id or a widget id).
///
/// The engine never dereferences it; it is handed back to the host render collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewportHandle(pub u64);

/// Normalized scroller configuration.
///
/// Built with [`Settings::normalize`] from raw (usually datasource-supplied) JSON. Every option
/// has a documented default and, for numbers, a minimum; malformed values silently degrade to
/// the default and out-of-range numbers clamp to the minimum. Construction never fails.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Settings {
    start_index: i64,
    buffer_size: usize,
    /// Viewport-size multiplier that defines how far beyond the visible area content is kept.
    padding: f64,
    /// Fixed item size; `None` means items are measured by the host.
    item_size: Option<u32>,
    infinite: bool,
    horizontal: bool,
    window_viewport: bool,
    viewport_element: Option<ViewportHandle>,

    current_start_index: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_index: DEFAULT_START_INDEX,
            buffer_size: DEFAULT_BUFFER_SIZE,
            padding: DEFAULT_PADDING,
            item_size: None,
            infinite: false,
            horizontal: false,
            window_viewport: false,
            viewport_element: None,
            current_start_index: DEFAULT_START_INDEX,
        }
    }
}

impl Settings {
    /// Normalizes raw settings.
    ///
    /// Recognized keys: `startIndex`, `bufferSize`, `padding`, `itemSize`, `infinite`,
    /// `horizontal`, `windowViewport`, `viewportElement`. Unknown keys are ignored; a non-object
    /// (including `null`) yields the defaults.
    pub fn normalize(raw: &Value) -> Self {
        let mut settings = Self::default();
        let Some(map) = raw.as_object() else {
            if !raw.is_null() {
                vwarn!(raw = %raw, "settings: expected an object, using defaults");
            }
            return settings;
        };

        if let Some(value) = map.get("startIndex") {
            settings.start_index = integer(value).unwrap_or_else(|| {
                vwarn!(%value, "settings: startIndex fallback to default");
                DEFAULT_START_INDEX
            });
        }
        if let Some(value) = map.get("bufferSize") {
            settings.buffer_size = match integer(value) {
                Some(n) if n < MIN_BUFFER_SIZE as i64 => MIN_BUFFER_SIZE,
                Some(n) => usize::try_from(n).unwrap_or(DEFAULT_BUFFER_SIZE),
                None => {
                    vwarn!(%value, "settings: bufferSize fallback to default");
                    DEFAULT_BUFFER_SIZE
                }
            };
        }
        if let Some(value) = map.get("padding") {
            settings.padding = match value.as_f64().filter(|p| p.is_finite()) {
                Some(p) => p.max(MIN_PADDING),
                None => {
                    vwarn!(%value, "settings: padding fallback to default");
                    DEFAULT_PADDING
                }
            };
        }
        if let Some(value) = map.get("itemSize") {
            settings.item_size = match integer(value) {
                Some(n) if n < MIN_ITEM_SIZE as i64 => Some(MIN_ITEM_SIZE),
                Some(n) => u32::try_from(n).ok(),
                None => None,
            };
        }
        if let Some(value) = map.get("infinite") {
            settings.infinite = value.as_bool().unwrap_or(false);
        }
        if let Some(value) = map.get("horizontal") {
            settings.horizontal = value.as_bool().unwrap_or(false);
        }
        if let Some(value) = map.get("windowViewport") {
            settings.window_viewport = value.as_bool().unwrap_or(false);
        }
        if let Some(value) = map.get("viewportElement") {
            settings.viewport_element = value.as_u64().map(ViewportHandle);
        }

        settings.current_start_index = settings.start_index;
        settings
    }

    pub fn start_index(&self) -> i64 {
        self.start_index
    }

    /// The index the next (re)load starts from. Equals `start_index` until a reload commits a
    /// different one.
    pub fn current_start_index(&self) -> i64 {
        self.current_start_index
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn padding(&self) -> f64 {
        self.padding
    }

    pub fn item_size(&self) -> Option<u32> {
        self.item_size
    }

    pub fn infinite(&self) -> bool {
        self.infinite
    }

    pub fn horizontal(&self) -> bool {
        self.horizontal
    }

    pub fn window_viewport(&self) -> bool {
        self.window_viewport
    }

    pub fn viewport_element(&self) -> Option<ViewportHandle> {
        self.viewport_element
    }

    pub(crate) fn set_current_start_index(&mut self, index: i64) {
        self.current_start_index = index;
    }

    pub fn with_start_index(mut self, start_index: i64) -> Self {
        self.start_index = start_index;
        self.current_start_index = start_index;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(MIN_BUFFER_SIZE);
        self
    }

    /// Non-finite values are ignored.
    pub fn with_padding(mut self, padding: f64) -> Self {
        if padding.is_finite() {
            self.padding = padding.max(MIN_PADDING);
        }
        self
    }

    pub fn with_item_size(mut self, item_size: Option<u32>) -> Self {
        self.item_size = item_size.map(|s| s.max(MIN_ITEM_SIZE));
        self
    }

    pub fn with_infinite(mut self, infinite: bool) -> Self {
        self.infinite = infinite;
        self
    }

    pub fn with_horizontal(mut self, horizontal: bool) -> Self {
        self.horizontal = horizontal;
        self
    }

    pub fn with_window_viewport(mut self, window_viewport: bool) -> Self {
        self.window_viewport = window_viewport;
        self
    }

    pub fn with_viewport_element(mut self, viewport_element: Option<ViewportHandle>) -> Self {
        self.viewport_element = viewport_element;
        self
    }
}

/// Diagnostics toggles supplied by the datasource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DevSettings {
    /// Log cycle and fetch outcomes.
    pub debug: bool,
    /// Log every process transition.
    pub log_process_run: bool,
}

impl DevSettings {
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_log_process_run(mut self, log_process_run: bool) -> Self {
        self.log_process_run = log_process_run;
        self
    }
}

/// Integers may arrive as JSON integers or as integral floats (`90.0`).
fn integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
