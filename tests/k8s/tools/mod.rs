pub mod k8s_env;
pub mod runtime;
