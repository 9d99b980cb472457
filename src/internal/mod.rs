pub(crate) mod callback_server;
pub(crate) mod flow_session;
