mod tools;

mod backup_restore;
mod ca_bundle;
mod workloads;
