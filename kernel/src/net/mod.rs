pub mod unixsocket;
