mod shared;

mod processing;
mod recovery;
mod scheduling;
