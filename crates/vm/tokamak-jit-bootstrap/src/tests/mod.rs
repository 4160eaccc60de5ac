mod helpers;

mod idle_lifecycle;
