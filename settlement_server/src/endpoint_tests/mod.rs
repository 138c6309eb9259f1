mod helpers;
mod orders;
mod refunds;
mod webhook;
