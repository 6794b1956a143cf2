pub mod chat_service;
pub mod connection_manager;
pub mod turn_processor;
