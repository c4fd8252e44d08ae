pub(crate) mod event_bus;
pub(crate) mod registry;
