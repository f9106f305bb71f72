pub mod resolver;

pub use resolver::{txt_matches, HickoryTxtResolver, ResolverSettings, ResolverSetupError};
