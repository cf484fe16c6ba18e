mod helpers;

mod health;
mod observer;
mod scenarios;
