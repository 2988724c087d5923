use crate::bot::Data;

pub mod admin_cog;
pub mod subscription_cog;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub use admin_cog::AdminCog;
use poise::Command;
pub use subscription_cog::SubscriptionCog;

pub trait Cog {
    fn commands(&self) -> Vec<Command<Data, Error>>;
}

pub struct Cogs;

impl Cog for Cogs {
    fn commands(&self) -> Vec<Command<Data, Error>> {
        let subscription_cog = SubscriptionCog;
        let admin_cog = AdminCog;

        subscription_cog
            .commands()
            .into_iter()
            .chain(admin_cog.commands())
            .collect()
    }
}
