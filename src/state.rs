//! Observable values for UI-facing state.
//!
//! Subscribers run synchronously, in registration order, after every
//! change. Partial updates exist only for [`Record`] types, so scalar
//! state cannot be patched.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Subscriber<T> = Box<dyn FnMut(&T) + Send>;

/// State made of named fields that can be patched piecemeal.
pub trait Record: Clone {
    type Patch;

    fn apply(&mut self, patch: Self::Patch);
}

pub struct Observable<T> {
    initial: T,
    value: T,
    subscribers: Vec<(SubscriptionId, Subscriber<T>)>,
    next_id: u64,
}

impl<T: Clone> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: initial.clone(),
            initial,
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.publish();
    }

    /// Restores the value the observable was created with.
    pub fn reset(&mut self) {
        self.value = self.initial.clone();
        self.publish();
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&T) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Subscribes and immediately calls `callback` with the current value.
    pub fn subscribe_and_init<F>(&mut self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(&T) + Send + 'static,
    {
        callback(&self.value);
        self.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn publish(&mut self) {
        let value = &self.value;
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(value);
        }
    }
}

impl<T: Record> Observable<T> {
    /// Merges `patch` into the current value and notifies with the result.
    pub fn update(&mut self, patch: T::Patch) {
        self.value.apply(patch);
        self.publish();
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Clear,
    Load,
    Ready,
    Fail,
}

/// Loading progress of the forecast and retrospective panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadStatus {
    pub forecast: LoadState,
    pub retro: LoadState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadStatusPatch {
    pub forecast: Option<LoadState>,
    pub retro: Option<LoadState>,
}

impl Record for LoadStatus {
    type Patch = LoadStatusPatch;

    fn apply(&mut self, patch: Self::Patch) {
        if let Some(forecast) = patch.forecast {
            self.forecast = forecast;
        }
        if let Some(retro) = patch.retro {
            self.retro = retro;
        }
    }
}

/// User toggles that change what gets fetched or shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub simple_forecast: bool,
    pub bias_corrected: bool,
    pub show_extra_retro_graphs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            simple_forecast: true,
            bias_corrected: false,
            show_extra_retro_graphs: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettingsPatch {
    pub simple_forecast: Option<bool>,
    pub bias_corrected: Option<bool>,
    pub show_extra_retro_graphs: Option<bool>,
}

impl Record for Settings {
    type Patch = SettingsPatch;

    fn apply(&mut self, patch: Self::Patch) {
        if let Some(value) = patch.simple_forecast {
            self.simple_forecast = value;
        }
        if let Some(value) = patch.bias_corrected {
            self.bias_corrected = value;
        }
        if let Some(value) = patch.show_extra_retro_graphs {
            self.show_extra_retro_graphs = value;
        }
    }
}
