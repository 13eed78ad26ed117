mod helpers;

mod iter_tests;
