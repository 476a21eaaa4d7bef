use gearman_core::Task;
use std::collections::HashMap;
use std::fmt;

/// Task events a callback can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The submit packet is about to be written
    Workload,
    Created,
    Data,
    Warning,
    Status,
    Complete,
    Exception,
    Fail,
}

pub type TaskCallback = Box<dyn FnMut(&Task) + Send>;
pub type LogCallback = Box<dyn FnMut(&str) + Send>;

/// Handlers keyed by event; an unset event is a no-op
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: HashMap<EventKind, TaskCallback>,
    log: Option<LogCallback>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .field("log", &self.log.is_some())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn set(&mut self, kind: EventKind, handler: TaskCallback) {
        self.handlers.insert(kind, handler);
    }

    pub fn set_log(&mut self, handler: LogCallback) {
        self.log = Some(handler);
    }

    pub fn is_set(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
        self.log = None;
    }

    pub fn fire(&mut self, kind: EventKind, task: &Task) {
        if let Some(handler) = self.handlers.get_mut(&kind) {
            handler(task);
        }
    }

    pub fn log(&mut self, message: &str) {
        if let Some(handler) = self.log.as_mut() {
            handler(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_unset_event_is_noop() {
        let mut registry = CallbackRegistry::default();
        let task = Task::new("reverse", Vec::new(), "").unwrap();
        registry.fire(EventKind::Complete, &task);
        registry.log("nobody listening");
        assert!(!registry.is_set(EventKind::Complete));
    }

    #[test]
    fn test_fire_and_clear() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::default();

        let sink = seen.clone();
        registry.set(
            EventKind::Created,
            Box::new(move |task: &Task| sink.lock().unwrap().push(task.function.clone())),
        );
        let sink = seen.clone();
        registry.set_log(Box::new(move |line: &str| sink.lock().unwrap().push(line.to_string())));

        let task = Task::new("resize", Vec::new(), "").unwrap();
        registry.fire(EventKind::Created, &task);
        registry.fire(EventKind::Data, &task);
        registry.log("hello");
        assert_eq!(*seen.lock().unwrap(), vec!["resize".to_string(), "hello".to_string()]);

        registry.clear();
        registry.fire(EventKind::Created, &task);
        registry.log("dropped");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
