pub mod modem;
